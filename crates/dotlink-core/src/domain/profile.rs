//! Immutable per-session description of the connected display.
//!
//! A [`DeviceProfile`] is chosen once, right after identification, from the
//! cell count and version the display reports.  It decides how cells are
//! transmitted ([`UpdatePolicy`], forced refresh cadence, write pacing),
//! how routing frames are interpreted ([`RoutingLayout`]) and what the keys
//! are called in logs.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::keys::bitfield::KeyByteDescriptor;
use crate::keys::{KeyEvent, KeyGroup};
use crate::protocol::tsi::{TsiIdentity, NAVIGATOR_KEYS, POWER_BRAILLE_KEYS};

/// Forced full refresh cadence of TSI displays, in render calls.
pub const TSI_REFRESH_INTERVAL: u32 = 12;

/// Post-write delay per slowness level of TSI displays.
pub const TSI_WRITE_DELAY_STEP: Duration = Duration::from_millis(24);

/// Unchanged cells tolerated inside one TSI write before it is split.
pub const TSI_MERGE_GAP: usize = 4;

/// Largest row a single TSI cell write can address.
pub const TSI_MAX_CELLS: usize = 127;

/// Capability reports that do not match any known model.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    /// The display reported a row length no known model has.
    #[error("unsupported cell count: {0}")]
    UnsupportedCellCount(usize),

    /// A routing frame carried a different number of bytes than the model
    /// produces.
    #[error("routing report has {declared} bytes, model expects {expected}")]
    RoutingCountMismatch { declared: usize, expected: usize },

    /// A routing frame arrived from a model without a routing layout.
    #[error("routing report from a display with no known routing layout")]
    NoRoutingLayout,
}

/// Selects the packet codec and back-end for a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolFamily {
    /// HumanWare Brailliant, serial protocol (RS-232, USB bulk, Bluetooth).
    #[serde(rename = "humanware")]
    HumanWare,
    /// HumanWare Brailliant, HID protocol.
    #[serde(rename = "humanware-hid")]
    HumanWareHid,
    /// Telesensory Navigator and PowerBraille.
    #[serde(rename = "tsi")]
    Tsi,
}

impl fmt::Display for ProtocolFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProtocolFamily::HumanWare => "humanware",
            ProtocolFamily::HumanWareHid => "humanware-hid",
            ProtocolFamily::Tsi => "tsi",
        })
    }
}

/// How the renderer turns a diff into writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePolicy {
    /// Any change retransmits every cell.
    WholeFrame,
    /// One write covering the first through last changed cell.
    ContiguousRange,
    /// One write per run of changed cells, where runs separated by at most
    /// `max_gap` unchanged cells are merged.
    MergedSpans { max_gap: usize },
}

/// Shape of a routing sensor report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingLayout {
    /// Byte count the report must declare.
    pub frame_bytes: u8,
    /// Leading bytes that do not belong to the routing keys.
    pub skipped_bytes: u8,
    /// Number of routing keys encoded after the skipped bytes.
    pub keys: u8,
}

/// Key naming scheme of a model family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyNames {
    HumanWare,
    NavigatorSmall,
    NavigatorLarge,
    PowerBrailleSmall,
    PowerBrailleLarge,
    /// No names beyond the routing group.
    Unnamed,
}

impl KeyNames {
    fn navigation(self, key: u8) -> Option<&'static str> {
        use crate::protocol::humanware::keys as hw;

        match self {
            KeyNames::HumanWare => Some(match key {
                hw::POWER => "Power",
                hw::DOT1 => "Dot1",
                hw::DOT2 => "Dot2",
                hw::DOT3 => "Dot3",
                hw::DOT4 => "Dot4",
                hw::DOT5 => "Dot5",
                hw::DOT6 => "Dot6",
                hw::DOT7 => "Dot7",
                hw::DOT8 => "Dot8",
                hw::SPACE => "Space",
                hw::NAV1 => "Display1",
                hw::NAV2 => "Display2",
                hw::NAV3 => "Display3",
                hw::NAV4 => "Display4",
                hw::NAV5 => "Display5",
                hw::NAV6 => "Display6",
                hw::THUMB1 => "Thumb1",
                hw::THUMB2 => "Thumb2",
                hw::THUMB3 => "Thumb3",
                hw::THUMB4 => "Thumb4",
                _ => return None,
            }),
            KeyNames::NavigatorSmall => Some(match key {
                0 => "NavLeft",
                1 => "NavUp",
                2 => "NavRight",
                3 => "NavDown",
                4 => "ThumbRight",
                5 => "CursorLeft",
                6 => "CursorUp",
                7 => "CursorRight",
                8 => "CursorDown",
                9 => "ThumbLeft",
                _ => return None,
            }),
            KeyNames::NavigatorLarge => Some(match key {
                0 => "LeftOuter",
                1 => "LeftInner",
                2 => "RightOuter",
                3 => "RightInner",
                4 => "RightThumb",
                5 => "CursorLeft",
                6 => "CursorUp",
                7 => "CursorRight",
                8 => "CursorDown",
                9 => "LeftThumb",
                _ => return None,
            }),
            KeyNames::PowerBrailleSmall => Some(match key {
                0 => "Backward",
                1 => "RightRockerUp",
                2 => "Forward",
                3 => "RightRockerDown",
                4 => "Concave",
                6 => "LeftRockerUp",
                8 => "LeftRockerDown",
                9 => "Convex",
                _ => return None,
            }),
            KeyNames::PowerBrailleLarge => Some(match key {
                5 => "Button1",
                6 => "LeftRockerUp",
                7 => "Button2",
                8 => "LeftRockerDown",
                9 => "Convex",
                10 => "Switch1Up",
                11 => "Switch1Down",
                12 => "Switch2Up",
                13 => "Switch2Down",
                14 => "Switch3Up",
                15 => "Switch3Down",
                16 => "Switch4Up",
                17 => "Switch4Down",
                18 => "Bar3",
                20 => "Bar4",
                21 => "Button3",
                23 => "Button4",
                24 => "Bar1",
                25 => "RightRockerUp",
                26 => "Bar2",
                27 => "RightRockerDown",
                28 => "Concave",
                _ => return None,
            }),
            KeyNames::Unnamed => None,
        }
    }
}

/// Everything the session needs to know about the connected model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProfile {
    pub model: String,
    pub family: ProtocolFamily,
    pub cell_count: usize,
    /// Routing keys the display has, whatever the encoding.
    pub routing_keys: usize,
    /// Present when routing keys arrive as sensor vectors.
    pub routing: Option<RoutingLayout>,
    /// Present when navigation keys arrive as signature-tagged bitfields.
    pub key_descriptors: &'static [KeyByteDescriptor],
    pub update_policy: UpdatePolicy,
    /// Render calls between forced full refreshes; 0 disables them.
    pub refresh_interval: u32,
    /// Quiet time the display needs after each write.
    pub write_delay: Duration,
    /// The model can be switched to 19200 baud.
    pub high_baud: bool,
    pub key_names: KeyNames,
}

struct TsiModel {
    name: &'static str,
    columns: usize,
    routing_bytes: u8,
    routing_keys: u8,
    slowness: u8,
    high_baud: bool,
    descriptors: &'static [KeyByteDescriptor],
    key_names: KeyNames,
}

const TSI_MODELS: [TsiModel; 6] = [
    TsiModel {
        name: "Navigator 20",
        columns: 20,
        routing_bytes: 9,
        routing_keys: 20,
        slowness: 0,
        high_baud: false,
        descriptors: &NAVIGATOR_KEYS,
        key_names: KeyNames::NavigatorSmall,
    },
    TsiModel {
        name: "Navigator 40",
        columns: 40,
        routing_bytes: 9,
        routing_keys: 40,
        slowness: 1,
        high_baud: false,
        descriptors: &NAVIGATOR_KEYS,
        key_names: KeyNames::NavigatorSmall,
    },
    TsiModel {
        name: "Navigator 80",
        columns: 80,
        routing_bytes: 14,
        routing_keys: 80,
        slowness: 2,
        high_baud: false,
        descriptors: &NAVIGATOR_KEYS,
        key_names: KeyNames::NavigatorLarge,
    },
    TsiModel {
        name: "PowerBraille 40",
        columns: 40,
        routing_bytes: 9,
        routing_keys: 40,
        slowness: 0,
        high_baud: true,
        descriptors: &NAVIGATOR_KEYS,
        key_names: KeyNames::PowerBrailleSmall,
    },
    TsiModel {
        name: "PowerBraille 65",
        columns: 65,
        routing_bytes: 15,
        routing_keys: 65,
        slowness: 2,
        high_baud: true,
        descriptors: &POWER_BRAILLE_KEYS,
        key_names: KeyNames::PowerBrailleLarge,
    },
    TsiModel {
        name: "PowerBraille 80",
        columns: 81,
        routing_bytes: 15,
        routing_keys: 81,
        slowness: 2,
        high_baud: true,
        descriptors: &POWER_BRAILLE_KEYS,
        key_names: KeyNames::PowerBrailleLarge,
    },
];

const NAVIGATOR_40: usize = 1;
const POWER_BRAILLE_40: usize = 3;

impl TsiModel {
    fn profile(&self) -> DeviceProfile {
        DeviceProfile {
            model: self.name.to_string(),
            family: ProtocolFamily::Tsi,
            cell_count: self.columns,
            routing_keys: self.routing_keys as usize,
            routing: Some(RoutingLayout {
                frame_bytes: self.routing_bytes,
                skipped_bytes: crate::protocol::tsi::ROUTING_VERTICAL_BYTES as u8,
                keys: self.routing_keys,
            }),
            key_descriptors: self.descriptors,
            // The slowest models cannot take back-to-back packets.
            update_policy: if self.slowness == 2 {
                UpdatePolicy::ContiguousRange
            } else {
                UpdatePolicy::MergedSpans {
                    max_gap: TSI_MERGE_GAP,
                }
            },
            refresh_interval: TSI_REFRESH_INTERVAL,
            write_delay: TSI_WRITE_DELAY_STEP * u32::from(self.slowness),
            high_baud: self.high_baud,
            key_names: self.key_names,
        }
    }
}

impl DeviceProfile {
    /// Picks the TSI model matching an identity reply.
    ///
    /// 40-cell Navigators and PowerBrailles are told apart by the first
    /// hardware version digit.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::UnsupportedCellCount`] for a row length no
    /// TSI model has; see [`DeviceProfile::tsi_generic`].
    pub fn tsi(identity: &TsiIdentity) -> Result<Self, CapabilityError> {
        let columns = identity.columns as usize;
        let model = if columns == 40 {
            let index = if identity.hardware_version()[0] > b'3' {
                POWER_BRAILLE_40
            } else {
                NAVIGATOR_40
            };
            &TSI_MODELS[index]
        } else {
            TSI_MODELS
                .iter()
                .find(|m| m.columns == columns)
                .ok_or(CapabilityError::UnsupportedCellCount(columns))?
        };
        Ok(model.profile())
    }

    /// Best-effort profile for a TSI-compatible display of unknown size.
    pub fn tsi_generic(columns: usize) -> Self {
        let cell_count = columns.min(TSI_MAX_CELLS);
        DeviceProfile {
            model: format!("TSI compatible ({cell_count} cells)"),
            family: ProtocolFamily::Tsi,
            cell_count,
            routing_keys: 0,
            routing: None,
            key_descriptors: &NAVIGATOR_KEYS,
            update_policy: UpdatePolicy::MergedSpans {
                max_gap: TSI_MERGE_GAP,
            },
            refresh_interval: TSI_REFRESH_INTERVAL,
            write_delay: Duration::ZERO,
            high_baud: false,
            key_names: KeyNames::NavigatorSmall,
        }
    }

    /// Brailliant displays take the whole row in every write and report
    /// keys as discrete transitions.
    pub fn humanware(family: ProtocolFamily, model_id: Option<u8>, cell_count: usize) -> Self {
        let model = match model_id {
            Some(id) => format!("Brailliant {cell_count} (model 0x{id:02X})"),
            None => format!("Brailliant {cell_count}"),
        };
        DeviceProfile {
            model,
            family,
            cell_count,
            routing_keys: cell_count,
            routing: None,
            key_descriptors: &[],
            update_policy: UpdatePolicy::WholeFrame,
            refresh_interval: 0,
            write_delay: Duration::ZERO,
            high_baud: false,
            key_names: KeyNames::HumanWare,
        }
    }

    /// Diagnostic name of a key, if the model family names it.
    pub fn key_name(&self, group: KeyGroup, key: u8) -> Option<&'static str> {
        match group {
            KeyGroup::Navigation => self.key_names.navigation(key),
            KeyGroup::Routing => Some("RoutingKey"),
        }
    }

    /// Human readable label such as `CursorLeft` or `RoutingKey.12`.
    pub fn describe(&self, event: &KeyEvent) -> String {
        match (event.group, self.key_name(event.group, event.key)) {
            (KeyGroup::Routing, Some(name)) => format!("{name}.{}", u16::from(event.key) + 1),
            (_, Some(name)) => name.to_string(),
            (group, None) => format!("{group}.{}", event.key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(columns: u8, major: u8) -> TsiIdentity {
        TsiIdentity {
            columns,
            dots: 8,
            version: [b'V', major, b'.', b'0'],
        }
    }

    #[test]
    fn test_tsi_40_cells_with_new_hardware_is_power_braille() {
        // Act
        let profile = DeviceProfile::tsi(&identity(40, b'4')).expect("known size");

        // Assert
        assert_eq!(profile.model, "PowerBraille 40");
        assert!(profile.high_baud);
        assert_eq!(profile.write_delay, Duration::ZERO);
    }

    #[test]
    fn test_tsi_40_cells_with_old_hardware_is_navigator() {
        // Act
        let profile = DeviceProfile::tsi(&identity(40, b'3')).expect("known size");

        // Assert
        assert_eq!(profile.model, "Navigator 40");
        assert!(!profile.high_baud);
        assert_eq!(profile.write_delay, Duration::from_millis(24));
        assert_eq!(profile.update_policy, UpdatePolicy::MergedSpans { max_gap: 4 });
    }

    #[test]
    fn test_tsi_slowest_models_use_single_contiguous_range() {
        let profile = DeviceProfile::tsi(&identity(81, b'1')).expect("known size");

        assert_eq!(profile.model, "PowerBraille 80");
        assert_eq!(profile.update_policy, UpdatePolicy::ContiguousRange);
        assert_eq!(profile.write_delay, Duration::from_millis(48));
        assert_eq!(profile.key_descriptors.len(), 6);
    }

    #[test]
    fn test_tsi_unknown_size_is_malformed_capability() {
        assert_eq!(
            DeviceProfile::tsi(&identity(32, b'1')),
            Err(CapabilityError::UnsupportedCellCount(32))
        );
    }

    #[test]
    fn test_tsi_generic_profile_is_sized_to_report_and_capped() {
        assert_eq!(DeviceProfile::tsi_generic(32).cell_count, 32);
        assert_eq!(DeviceProfile::tsi_generic(200).cell_count, TSI_MAX_CELLS);
    }

    #[test]
    fn test_key_names_follow_model_family() {
        // Arrange
        let navigator = DeviceProfile::tsi(&identity(80, b'1')).expect("known size");
        let power_braille = DeviceProfile::tsi(&identity(65, b'1')).expect("known size");

        // Act / Assert
        assert_eq!(navigator.key_name(KeyGroup::Navigation, 0), Some("LeftOuter"));
        assert_eq!(power_braille.key_name(KeyGroup::Navigation, 24), Some("Bar1"));
        assert_eq!(power_braille.key_name(KeyGroup::Navigation, 19), None);
    }

    #[test]
    fn test_describe_numbers_routing_keys_from_one() {
        let profile = DeviceProfile::humanware(ProtocolFamily::HumanWare, None, 40);

        assert_eq!(
            profile.describe(&KeyEvent::press(KeyGroup::Routing, 0)),
            "RoutingKey.1"
        );
        assert_eq!(
            profile.describe(&KeyEvent::press(KeyGroup::Navigation, 0x0A)),
            "Space"
        );
        assert_eq!(
            profile.describe(&KeyEvent::press(KeyGroup::Navigation, 0x40)),
            "navigation.64"
        );
    }
}
