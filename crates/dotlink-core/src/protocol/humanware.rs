//! HumanWare (Brailliant) wire format.
//!
//! Serial-protocol frames, used over RS-232 and over the USB bulk interface:
//! ```text
//! [ESC=0x1B][type:1][length:1][payload:length]
//! ```
//! HID-protocol displays exchange fixed reports instead; see [`hid`].

use super::{PacketVerifier, ProtocolError, Verdict};

/// Every serial frame starts with this byte.
pub const ESC: u8 = 0x1B;

/// `ESC`, type and length.
pub const HEADER_LEN: usize = 3;

/// The length field is a single byte.
pub const MAX_PAYLOAD_LEN: usize = 0xFF;

/// Largest serial frame on the wire.
pub const MAX_FRAME_LEN: usize = HEADER_LEN + MAX_PAYLOAD_LEN;

/// Key ids at or above this value are routing keys (`id - ROUTING_BASE`).
pub const ROUTING_BASE: u8 = 0x50;

/// Serial message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Init = 0x00,
    InitResponse = 0x01,
    Display = 0x02,
    GetKeys = 0x03,
    GetKeysResponse = 0x04,
    KeyDown = 0x05,
    KeyUp = 0x06,
    FirmwareUpdate = 0x07,
    FirmwareResponse = 0x08,
    Configuration = 0x09,
    ConfigurationResponse = 0x0A,
    GetConfiguration = 0x0B,
    GetConfigurationResponse = 0x0C,
}

impl TryFrom<u8> for MessageType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::Init),
            0x01 => Ok(Self::InitResponse),
            0x02 => Ok(Self::Display),
            0x03 => Ok(Self::GetKeys),
            0x04 => Ok(Self::GetKeysResponse),
            0x05 => Ok(Self::KeyDown),
            0x06 => Ok(Self::KeyUp),
            0x07 => Ok(Self::FirmwareUpdate),
            0x08 => Ok(Self::FirmwareResponse),
            0x09 => Ok(Self::Configuration),
            0x0A => Ok(Self::ConfigurationResponse),
            0x0B => Ok(Self::GetConfiguration),
            0x0C => Ok(Self::GetConfigurationResponse),
            _ => Err(()),
        }
    }
}

/// Navigation key ids as reported in `KEY_DOWN`/`KEY_UP` messages.
pub mod keys {
    pub const POWER: u8 = 0x01;
    pub const DOT1: u8 = 0x02;
    pub const DOT2: u8 = 0x03;
    pub const DOT3: u8 = 0x04;
    pub const DOT4: u8 = 0x05;
    pub const DOT5: u8 = 0x06;
    pub const DOT6: u8 = 0x07;
    pub const DOT7: u8 = 0x08;
    pub const DOT8: u8 = 0x09;
    pub const SPACE: u8 = 0x0A;
    pub const NAV1: u8 = 0x0B;
    pub const NAV2: u8 = 0x0C;
    pub const NAV3: u8 = 0x0D;
    pub const NAV4: u8 = 0x0E;
    pub const NAV5: u8 = 0x0F;
    pub const NAV6: u8 = 0x10;
    pub const THUMB1: u8 = 0x11;
    pub const THUMB2: u8 = 0x12;
    pub const THUMB3: u8 = 0x13;
    pub const THUMB4: u8 = 0x14;
}

// ── Verifier ──────────────────────────────────────────────────────────────────

/// Type A verifier: fixed three-byte header whose last byte adds the payload
/// length.
#[derive(Debug, Default)]
pub struct HumanWareVerifier {
    expected: usize,
}

impl PacketVerifier for HumanWareVerifier {
    fn max_frame_len(&self) -> usize {
        MAX_FRAME_LEN
    }

    fn verify(&mut self, frame: &[u8]) -> Verdict {
        let byte = frame[frame.len() - 1];

        match frame.len() {
            1 => {
                if byte != ESC {
                    return Verdict::Invalid;
                }
                self.expected = HEADER_LEN;
            }
            2 => {
                if MessageType::try_from(byte).is_err() {
                    return Verdict::Invalid;
                }
            }
            3 => self.expected = HEADER_LEN + byte as usize,
            _ => {}
        }

        Verdict::from_progress(frame.len(), self.expected)
    }
}

// ── Inbound messages ──────────────────────────────────────────────────────────

/// Payload of `INIT_RESP`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitResponse {
    pub stm_version: (u8, u8),
    pub bluetooth_version: (u8, u8),
    /// The display reports that its communication channel is unavailable.
    pub communication_disabled: bool,
    pub model_id: u8,
    pub cell_count: u8,
}

impl InitResponse {
    pub const PAYLOAD_LEN: usize = 7;

    /// Firmware versions formatted for logs, e.g. `stm 1.4 / bt 2.0`.
    pub fn firmware(&self) -> String {
        format!(
            "stm {}.{} / bt {}.{}",
            self.stm_version.0, self.stm_version.1, self.bluetooth_version.0, self.bluetooth_version.1
        )
    }
}

/// A decoded serial-protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HumanWareMessage {
    InitResponse(InitResponse),
    KeyDown(u8),
    KeyUp(u8),
    /// A well-formed frame of a type the driver does not act on.
    Other { message_type: MessageType, payload: Vec<u8> },
}

/// Decodes one complete frame produced by [`HumanWareVerifier`].
///
/// # Errors
///
/// Returns [`ProtocolError::UnexpectedFrame`] when the header is damaged or
/// the payload is too short for its message type.
pub fn decode_frame(frame: &[u8]) -> Result<HumanWareMessage, ProtocolError> {
    let unexpected = || ProtocolError::UnexpectedFrame(frame.to_vec());

    if frame.len() < HEADER_LEN || frame[0] != ESC {
        return Err(unexpected());
    }
    let message_type = MessageType::try_from(frame[1]).map_err(|_| unexpected())?;
    let payload = &frame[HEADER_LEN..];
    if payload.len() != frame[2] as usize {
        return Err(unexpected());
    }

    match message_type {
        MessageType::InitResponse => {
            if payload.len() < InitResponse::PAYLOAD_LEN {
                return Err(unexpected());
            }
            Ok(HumanWareMessage::InitResponse(InitResponse {
                stm_version: (payload[0], payload[1]),
                bluetooth_version: (payload[2], payload[3]),
                communication_disabled: payload[4] != 0,
                model_id: payload[5],
                cell_count: payload[6],
            }))
        }
        MessageType::KeyDown | MessageType::KeyUp => {
            let id = *payload.first().ok_or_else(unexpected)?;
            Ok(if message_type == MessageType::KeyDown {
                HumanWareMessage::KeyDown(id)
            } else {
                HumanWareMessage::KeyUp(id)
            })
        }
        _ => Ok(HumanWareMessage::Other {
            message_type,
            payload: payload.to_vec(),
        }),
    }
}

// ── Outbound packets ──────────────────────────────────────────────────────────

/// Builds `[ESC][type][len][payload]`.
///
/// # Errors
///
/// Returns [`ProtocolError::PayloadTooLarge`] if `payload` exceeds 255 bytes.
pub fn encode_packet(message_type: MessageType, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::PayloadTooLarge {
            len: payload.len(),
            limit: MAX_PAYLOAD_LEN,
        });
    }

    let mut packet = Vec::with_capacity(HEADER_LEN + payload.len());
    packet.push(ESC);
    packet.push(message_type as u8);
    packet.push(payload.len() as u8);
    packet.extend_from_slice(payload);
    Ok(packet)
}

/// The `INIT` request that makes the display answer with `INIT_RESP`.
pub fn identify_request() -> Vec<u8> {
    vec![ESC, MessageType::Init as u8, 0]
}

/// A `DISPLAY` packet carrying the whole row of cells.
///
/// # Errors
///
/// Returns [`ProtocolError::PayloadTooLarge`] for more than 255 cells.
pub fn display_packet(cells: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    encode_packet(MessageType::Display, cells)
}

// ── HID reports ───────────────────────────────────────────────────────────────

/// Report layouts of HID-protocol Brailliant displays.
pub mod hid {
    use super::ProtocolError;

    /// Feature report describing the display.
    pub const CAPABILITIES_REPORT: u8 = 0x01;

    /// Output report that sets braille cells.
    pub const WRITE_CELLS_REPORT: u8 = 0x02;

    /// Size of the capabilities report as defined by the firmware.
    pub const CAPABILITIES_LEN: usize = 12;

    /// Parsed capabilities feature report.
    ///
    /// Layout: `[report id][major][minor][revision×2][cell count][reserved…]`,
    /// with the version digits sent as ASCII characters.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Capabilities {
        pub version: [u8; 4],
        pub cell_count: u8,
    }

    impl Capabilities {
        /// Parses a feature report, zero-padding it when the device returned
        /// fewer bytes than the full layout.
        pub fn parse(report: &[u8]) -> Self {
            let mut bytes = [0u8; CAPABILITIES_LEN];
            let count = report.len().min(CAPABILITIES_LEN);
            bytes[..count].copy_from_slice(&report[..count]);

            Self {
                version: [bytes[1], bytes[2], bytes[3], bytes[4]],
                cell_count: bytes[5],
            }
        }

        /// Firmware version as `major.minor.revision`.
        pub fn firmware(&self) -> String {
            let [major, minor, rev0, rev1] = self.version.map(|b| if b == 0 { '0' } else { b as char });
            format!("{major}.{minor}.{rev0}{rev1}")
        }
    }

    /// `[report id][1][0][count][cells…]`
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::PayloadTooLarge`] for more than 255 cells.
    pub fn write_cells_report(cells: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let count = u8::try_from(cells.len()).map_err(|_| ProtocolError::PayloadTooLarge {
            len: cells.len(),
            limit: u8::MAX as usize,
        })?;

        let mut report = Vec::with_capacity(4 + cells.len());
        report.extend_from_slice(&[WRITE_CELLS_REPORT, 1, 0, count]);
        report.extend_from_slice(cells);
        Ok(report)
    }
}
