//! TOML-based configuration for the `dotlinkd` daemon.
//!
//! Reads and writes [`AppConfig`] at the platform-appropriate location:
//! - Windows:  `%APPDATA%\Dotlink\config.toml`
//! - Linux:    `~/.config/dotlink/config.toml`
//! - macOS:    `~/Library/Application Support/Dotlink/config.toml`
//!
//! # Example
//!
//! ```toml
//! [daemon]
//! log_level = "debug"
//! poll_interval_ms = 40
//!
//! [negotiation]
//! allow_high_baud = false
//!
//! [keys]
//! release_debounce_ms = 30
//!
//! [[devices]]
//! link = "serial"
//! protocol = "tsi"
//! path = "/dev/ttyUSB0"
//! ```
//!
//! Every field has a default (`#[serde(default = "...")]`), so an empty
//! file, or no file at all, yields a configuration that probes the
//! built-in candidate list.

use std::path::{Path, PathBuf};
use std::time::Duration;

use dotlink_core::ProtocolFamily;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::channel::{ConnectCandidate, LinkSpec, UsbEndpoints};
use crate::application::session::SessionOptions;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level daemon configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub negotiation: NegotiationConfig,
    #[serde(default)]
    pub keys: KeysConfig,
    #[serde(default)]
    pub render: RenderConfig,
    /// Ordered connect descriptor; the first display that answers wins.
    #[serde(default = "default_devices")]
    pub devices: Vec<DeviceEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DaemonConfig {
    /// `tracing` log level used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Length of one scheduling tick.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How many times a lost session is reopened before giving up.
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NegotiationConfig {
    /// Overrides the protocol's identification timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identify_timeout_ms: Option<u64>,
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_true")]
    pub allow_high_baud: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct KeysConfig {
    /// 0 disables release debouncing.
    #[serde(default)]
    pub release_debounce_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RenderConfig {
    /// Overrides the model's forced refresh cadence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_interval: Option<u32>,
    /// What the daemon shows on the display.
    #[serde(default)]
    pub test_pattern: TestPattern,
}

/// Static content shown by the daemon in place of screen text.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TestPattern {
    Blank,
    /// Every dot raised.
    Full,
    /// Cell `i` shows the dots `1..=(i mod 8) + 1`.
    #[default]
    Ladder,
    /// Alternating dots 1-4-7 / 2-5-8 columns.
    Checker,
}

impl TestPattern {
    /// Cell buffer of `count` cells for this pattern.
    pub fn cells(self, count: usize) -> Vec<u8> {
        (0..count)
            .map(|i| match self {
                TestPattern::Blank => 0x00,
                TestPattern::Full => 0xFF,
                TestPattern::Ladder => {
                    let dots = (i % 8) as u32 + 1;
                    ((1u16 << dots) - 1) as u8
                }
                TestPattern::Checker => {
                    if i % 2 == 0 {
                        0b0101_0101
                    } else {
                        0b1010_1010
                    }
                }
            })
            .collect()
    }
}

/// One candidate link, tagged by `link`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "link", rename_all = "lowercase")]
pub enum DeviceEntry {
    Serial {
        protocol: ProtocolFamily,
        path: String,
    },
    Usb {
        protocol: ProtocolFamily,
        vendor_id: u16,
        product_id: u16,
        #[serde(default = "default_usb_configuration")]
        configuration: u8,
        interface: u8,
        #[serde(default)]
        alternate_setting: u8,
        input_endpoint: u8,
        output_endpoint: u8,
    },
    Hid {
        protocol: ProtocolFamily,
        vendor_id: u16,
        product_id: u16,
    },
    Bluetooth {
        protocol: ProtocolFamily,
        /// tty the RFCOMM channel is bound to, e.g. `/dev/rfcomm0`.
        device: String,
        #[serde(default = "default_rfcomm_channel")]
        channel: u8,
    },
}

impl DeviceEntry {
    pub fn to_candidate(&self) -> ConnectCandidate {
        match self {
            DeviceEntry::Serial { protocol, path } => ConnectCandidate {
                link: LinkSpec::Serial { path: path.clone() },
                protocol: *protocol,
            },
            DeviceEntry::Usb {
                protocol,
                vendor_id,
                product_id,
                configuration,
                interface,
                alternate_setting,
                input_endpoint,
                output_endpoint,
            } => ConnectCandidate {
                link: LinkSpec::Usb(UsbEndpoints {
                    vendor_id: *vendor_id,
                    product_id: *product_id,
                    configuration: *configuration,
                    interface: *interface,
                    alternate_setting: *alternate_setting,
                    input_endpoint: *input_endpoint,
                    output_endpoint: *output_endpoint,
                }),
                protocol: *protocol,
            },
            DeviceEntry::Hid {
                protocol,
                vendor_id,
                product_id,
            } => ConnectCandidate {
                link: LinkSpec::Hid {
                    vendor_id: *vendor_id,
                    product_id: *product_id,
                },
                protocol: *protocol,
            },
            DeviceEntry::Bluetooth {
                protocol,
                device,
                channel,
            } => ConnectCandidate {
                link: LinkSpec::Bluetooth {
                    device: device.clone(),
                    channel: *channel,
                },
                protocol: *protocol,
            },
        }
    }
}

impl AppConfig {
    /// Session tunables derived from the `[negotiation]`, `[keys]` and
    /// `[render]` sections.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            identify_timeout: self.negotiation.identify_timeout_ms.map(Duration::from_millis),
            settle_delay: Duration::from_millis(self.negotiation.settle_delay_ms),
            allow_high_baud: self.negotiation.allow_high_baud,
            release_debounce: Duration::from_millis(self.keys.release_debounce_ms),
            refresh_interval: self.render.refresh_interval,
        }
    }

    pub fn candidates(&self) -> Vec<ConnectCandidate> {
        self.devices.iter().map(DeviceEntry::to_candidate).collect()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.daemon.poll_interval_ms.max(1))
    }
}

// ── Default helpers ───────────────────────────────────────────────────────────

/// Brailliant vendor id.
const HUMANWARE_VENDOR: u16 = 0x1C71;

fn default_log_level() -> String {
    "info".to_string()
}
fn default_poll_interval_ms() -> u64 {
    40
}
fn default_max_restarts() -> u32 {
    3
}
fn default_settle_delay_ms() -> u64 {
    100
}
fn default_true() -> bool {
    true
}
fn default_usb_configuration() -> u8 {
    1
}
fn default_rfcomm_channel() -> u8 {
    1
}

/// HumanWare over USB bulk, HumanWare over HID, then TSI on the first
/// serial port.
pub fn default_devices() -> Vec<DeviceEntry> {
    vec![
        DeviceEntry::Usb {
            protocol: ProtocolFamily::HumanWare,
            vendor_id: HUMANWARE_VENDOR,
            product_id: 0xC005,
            configuration: 1,
            interface: 1,
            alternate_setting: 0,
            input_endpoint: 2,
            output_endpoint: 3,
        },
        DeviceEntry::Hid {
            protocol: ProtocolFamily::HumanWareHid,
            vendor_id: HUMANWARE_VENDOR,
            product_id: 0xC006,
        },
        DeviceEntry::Serial {
            protocol: ProtocolFamily::Tsi,
            path: "/dev/ttyS0".to_string(),
        },
    ]
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            daemon: DaemonConfig::default(),
            negotiation: NegotiationConfig::default(),
            keys: KeysConfig::default(),
            render: RenderConfig::default(),
            devices: default_devices(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            poll_interval_ms: default_poll_interval_ms(),
            max_restarts: default_max_restarts(),
        }
    }
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            identify_timeout_ms: None,
            settle_delay_ms: default_settle_delay_ms(),
            allow_high_baud: default_true(),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the default config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot
/// be determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads the config from the default location.
///
/// # Errors
///
/// See [`load_config_from`].
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Writes `config` to `path` as pretty TOML, creating parent directories.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolves the platform config base directory including the `Dotlink`
/// subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("Dotlink"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("dotlink"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME")
            .map(|h| PathBuf::from(h).join("Library").join("Application Support").join("Dotlink"))
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_yields_defaults() {
        // Arrange / Act
        let cfg: AppConfig = toml::from_str("").expect("empty TOML parses");

        // Assert
        assert_eq!(cfg, AppConfig::default());
        assert_eq!(cfg.daemon.poll_interval_ms, 40);
        assert_eq!(cfg.daemon.max_restarts, 3);
        assert_eq!(cfg.negotiation.settle_delay_ms, 100);
        assert!(cfg.negotiation.allow_high_baud);
        assert_eq!(cfg.keys.release_debounce_ms, 0);
    }

    #[test]
    fn test_default_candidates_probe_humanware_before_tsi() {
        let candidates = AppConfig::default().candidates();

        let protocols: Vec<_> = candidates.iter().map(|c| c.protocol).collect();
        assert_eq!(
            protocols,
            vec![ProtocolFamily::HumanWare, ProtocolFamily::HumanWareHid, ProtocolFamily::Tsi]
        );
        assert_eq!(candidates[1].link.to_string(), "hid:1C71:C006");
    }

    #[test]
    fn test_device_entries_are_tagged_by_link() {
        // Arrange
        let text = r#"
            [[devices]]
            link = "serial"
            protocol = "tsi"
            path = "/dev/ttyUSB0"

            [[devices]]
            link = "bluetooth"
            protocol = "humanware"
            device = "/dev/rfcomm0"
        "#;

        // Act
        let cfg: AppConfig = toml::from_str(text).expect("parses");

        // Assert
        assert_eq!(
            cfg.candidates(),
            vec![
                ConnectCandidate {
                    link: LinkSpec::Serial {
                        path: "/dev/ttyUSB0".to_string()
                    },
                    protocol: ProtocolFamily::Tsi,
                },
                ConnectCandidate {
                    link: LinkSpec::Bluetooth {
                        device: "/dev/rfcomm0".to_string(),
                        channel: 1
                    },
                    protocol: ProtocolFamily::HumanWare,
                },
            ]
        );
    }

    #[test]
    fn test_session_options_convert_milliseconds() {
        // Arrange
        let mut cfg = AppConfig::default();
        cfg.negotiation.identify_timeout_ms = Some(250);
        cfg.keys.release_debounce_ms = 30;
        cfg.render.refresh_interval = Some(5);

        // Act
        let options = cfg.session_options();

        // Assert
        assert_eq!(options.identify_timeout, Some(Duration::from_millis(250)));
        assert_eq!(options.release_debounce, Duration::from_millis(30));
        assert_eq!(options.refresh_interval, Some(5));
        assert_eq!(options.settle_delay, Duration::from_millis(100));
    }

    #[test]
    fn test_unknown_protocol_is_a_parse_error() {
        let text = "[[devices]]\nlink = \"serial\"\nprotocol = \"baum\"\npath = \"/dev/ttyS1\"\n";

        let result: Result<AppConfig, _> = toml::from_str(text);

        assert!(result.is_err());
    }

    #[test]
    fn test_ladder_pattern_climbs_one_dot_per_cell() {
        let cells = TestPattern::Ladder.cells(10);

        assert_eq!(&cells[..3], &[0x01, 0x03, 0x07]);
        assert_eq!(cells[7], 0xFF);
        assert_eq!(cells[8], 0x01);
    }

    #[test]
    fn test_save_then_load_preserves_config() {
        // Arrange
        let dir = std::env::temp_dir().join(format!("dotlink-config-{}", uuid::Uuid::new_v4()));
        let path = dir.join("nested").join("config.toml");
        let mut cfg = AppConfig::default();
        cfg.daemon.log_level = "debug".to_string();
        cfg.render.test_pattern = TestPattern::Checker;

        // Act
        save_config_to(&cfg, &path).expect("save");
        let restored = load_config_from(&path).expect("load");
        let _ = std::fs::remove_dir_all(&dir);

        // Assert
        assert_eq!(cfg, restored);
    }

    #[test]
    fn test_missing_file_loads_defaults() {
        let path = std::env::temp_dir().join("dotlink-definitely-missing").join("config.toml");

        let cfg = load_config_from(&path).expect("missing file is not an error");

        assert_eq!(cfg, AppConfig::default());
    }
}
