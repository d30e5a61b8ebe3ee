//! Telesensory Systems (Navigator, PowerBraille) wire format.
//!
//! Inbound frames come in two shapes:
//!
//! - **Header frames** (Type B): `[0x00][kind]...`.  The second byte tells
//!   identity (`0x05`, fixed 12 bytes), routing (`0x08`, a third byte
//!   carries the payload length) or battery-low (`0x01`, no payload).
//! - **Key frames** (Type C): 2 or 6 bytes with no header at all.  Each byte
//!   carries a positional signature in its top three bits, so the frame
//!   boundary is found purely by signature matching.
//!
//! Outbound commands all start with `FF FF`.

use super::{PacketVerifier, ProtocolError, Verdict};
use crate::keys::bitfield::{self, KeyByteDescriptor};

/// First byte of every header frame.
pub const HEADER: u8 = 0x00;
pub const IDENTITY_KIND: u8 = 0x05;
pub const ROUTING_KIND: u8 = 0x08;
pub const BATTERY_KIND: u8 = 0x01;

/// `[00][05][columns][dots][version×4][checksum×4]`
pub const IDENTITY_LEN: usize = 12;

/// Routing replies start with sensor bytes for the vertical strip, which
/// the driver does not use.
pub const ROUTING_VERTICAL_BYTES: usize = 4;

/// Routing header plus the largest length a single byte can announce.
pub const MAX_FRAME_LEN: usize = 3 + 0xFF;

/// Asks the display to identify itself.
pub const QUERY_REQUEST: [u8; 3] = [0xFF, 0xFF, 0x0A];

/// Prefix of every cell write; the cursor is always off.
pub const SEND_HEADER: [u8; 6] = [0xFF, 0xFF, 0x04, 0x00, 0x99, 0x00];

/// Fixed bytes of a cell write before the cell pairs: header, length, offset.
pub const SEND_OVERHEAD: usize = SEND_HEADER.len() + 2;

pub const TYPEMATIC_DELAY: u8 = 5;
pub const TYPEMATIC_REPEAT: u8 = 2;

/// Key bytes of Navigator and PowerBraille 40 displays.
pub const NAVIGATOR_KEYS: [KeyByteDescriptor; 2] = [
    KeyByteDescriptor::new(0x60, 0x1F, 0),
    KeyByteDescriptor::new(0xE0, 0x1F, 5),
];

/// Key bytes of PowerBraille 65 and 80 displays.
pub const POWER_BRAILLE_KEYS: [KeyByteDescriptor; 6] = [
    KeyByteDescriptor::new(0x40, 0x0F, 10),
    KeyByteDescriptor::new(0xC0, 0x0F, 14),
    KeyByteDescriptor::new(0x20, 0x05, 18),
    KeyByteDescriptor::new(0xA0, 0x05, 21),
    KeyByteDescriptor::new(0x60, 0x1F, 24),
    KeyByteDescriptor::new(0xE0, 0x1F, 5),
];

/// Which of the two key frame layouts a frame uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyLayout {
    Navigator,
    PowerBraille,
}

impl KeyLayout {
    pub fn descriptors(self) -> &'static [KeyByteDescriptor] {
        match self {
            KeyLayout::Navigator => &NAVIGATOR_KEYS,
            KeyLayout::PowerBraille => &POWER_BRAILLE_KEYS,
        }
    }

    /// The layout whose first descriptor accepts `byte`, if any.
    pub fn for_first_byte(byte: u8) -> Option<Self> {
        [KeyLayout::Navigator, KeyLayout::PowerBraille]
            .into_iter()
            .find(|layout| layout.descriptors()[0].matches(byte))
    }
}

// ── Verifier ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    /// `0x00` seen, kind byte not yet.
    Header,
    Identity,
    Routing,
    Battery,
    Keys(KeyLayout),
}

/// Verifier for both header and key frames.
#[derive(Debug)]
pub struct TsiVerifier {
    kind: FrameKind,
    expected: usize,
}

impl Default for TsiVerifier {
    fn default() -> Self {
        Self {
            kind: FrameKind::Header,
            expected: 0,
        }
    }
}

impl PacketVerifier for TsiVerifier {
    fn max_frame_len(&self) -> usize {
        MAX_FRAME_LEN
    }

    fn verify(&mut self, frame: &[u8]) -> Verdict {
        let index = frame.len() - 1;
        let byte = frame[index];

        if index == 0 {
            if byte == HEADER {
                self.kind = FrameKind::Header;
                self.expected = 2;
            } else if let Some(layout) = KeyLayout::for_first_byte(byte) {
                self.kind = FrameKind::Keys(layout);
                self.expected = layout.descriptors().len();
            } else {
                return Verdict::Invalid;
            }
            return Verdict::NeedMore {
                expected: self.expected,
            };
        }

        match self.kind {
            FrameKind::Header => match byte {
                IDENTITY_KIND => {
                    self.kind = FrameKind::Identity;
                    self.expected = IDENTITY_LEN;
                }
                ROUTING_KIND => {
                    self.kind = FrameKind::Routing;
                    self.expected = 3;
                }
                BATTERY_KIND => self.kind = FrameKind::Battery,
                _ => return Verdict::Invalid,
            },
            FrameKind::Routing if index == 2 => self.expected += byte as usize,
            FrameKind::Keys(layout) => {
                if !layout.descriptors()[index].matches(byte) {
                    return Verdict::Invalid;
                }
            }
            _ => {}
        }

        Verdict::from_progress(frame.len(), self.expected)
    }
}

// ── Inbound messages ──────────────────────────────────────────────────────────

/// Identity reply to [`QUERY_REQUEST`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TsiIdentity {
    pub columns: u8,
    pub dots: u8,
    pub version: [u8; 4],
}

impl TsiIdentity {
    /// The three hardware version characters following the leading `V`.
    pub fn hardware_version(&self) -> [u8; 3] {
        [self.version[1], self.version[2], self.version[3]]
    }

    pub fn version_string(&self) -> String {
        self.hardware_version().iter().map(|b| *b as char).collect()
    }
}

/// A decoded TSI frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TsiMessage {
    Identity(TsiIdentity),
    /// Routing sensor state.  `sensors` holds all `count` bytes, vertical
    /// strip first.
    Routing { count: u8, sensors: Vec<u8> },
    LowBattery,
    /// Raw key bytes, signatures already verified.
    Keys { layout: KeyLayout, bytes: Vec<u8> },
}

/// Decodes one complete frame produced by [`TsiVerifier`].
///
/// # Errors
///
/// Returns [`ProtocolError::UnexpectedFrame`] when the frame does not have
/// the shape its header promises.
pub fn decode_frame(frame: &[u8]) -> Result<TsiMessage, ProtocolError> {
    let unexpected = || ProtocolError::UnexpectedFrame(frame.to_vec());
    let first = *frame.first().ok_or_else(unexpected)?;

    if first != HEADER {
        let layout = KeyLayout::for_first_byte(first).ok_or_else(unexpected)?;
        if bitfield::signature_mismatch(frame, layout.descriptors()).is_some() {
            return Err(unexpected());
        }
        return Ok(TsiMessage::Keys {
            layout,
            bytes: frame.to_vec(),
        });
    }

    match frame.get(1) {
        Some(&IDENTITY_KIND) if frame.len() == IDENTITY_LEN => Ok(TsiMessage::Identity(TsiIdentity {
            columns: frame[2],
            dots: frame[3],
            version: [frame[4], frame[5], frame[6], frame[7]],
        })),
        Some(&ROUTING_KIND) if frame.len() >= 3 && frame.len() == 3 + frame[2] as usize => {
            Ok(TsiMessage::Routing {
                count: frame[2],
                sensors: frame[3..].to_vec(),
            })
        }
        Some(&BATTERY_KIND) if frame.len() == 2 => Ok(TsiMessage::LowBattery),
        _ => Err(unexpected()),
    }
}

// ── Outbound packets ──────────────────────────────────────────────────────────

/// Line speed code understood by the baud change command.
pub fn baud_code(baud: u32) -> Option<u8> {
    match baud {
        4800 => Some(2),
        9600 => Some(3),
        19200 => Some(4),
        _ => None,
    }
}

/// `FF FF 05 <code>`, or `None` when the display has no code for `baud`.
pub fn baud_change_request(baud: u32) -> Option<[u8; 4]> {
    baud_code(baud).map(|code| [0xFF, 0xFF, 0x05, code])
}

/// `FF FF 0D <delay> <repeat>`
pub fn typematic_request() -> [u8; 5] {
    [0xFF, 0xFF, 0x0D, TYPEMATIC_DELAY, TYPEMATIC_REPEAT]
}

/// Writes `cells` starting at cell `offset`:
/// `FF FF 04 00 99 00 <2·n> <offset>` followed by n pairs `00 <cell>`.
///
/// # Errors
///
/// Returns [`ProtocolError::PayloadTooLarge`] if the pair count or offset
/// does not fit in a byte.
pub fn cells_packet(offset: usize, cells: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let too_large = || ProtocolError::PayloadTooLarge {
        len: offset + cells.len(),
        limit: 0x7F,
    };
    let length = u8::try_from(cells.len() * 2).map_err(|_| too_large())?;
    let offset = u8::try_from(offset).map_err(|_| too_large())?;

    let mut packet = Vec::with_capacity(SEND_OVERHEAD + cells.len() * 2);
    packet.extend_from_slice(&SEND_HEADER);
    packet.push(length);
    packet.push(offset);
    for cell in cells {
        packet.push(0x00);
        packet.push(*cell);
    }
    Ok(packet)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FrameAssembler;

    fn run(verifier: &mut TsiVerifier, frame: &[u8]) -> Verdict {
        let mut verdict = Verdict::Invalid;
        for len in 1..=frame.len() {
            verdict = verifier.verify(&frame[..len]);
        }
        verdict
    }

    #[test]
    fn test_identity_frame_is_twelve_bytes() {
        // Arrange
        let mut verifier = TsiVerifier::default();
        let frame = [0x00, 0x05, 40, 8, b'V', b'4', b'.', b'0', 0, 0, 0, 0];

        // Act
        let at_eleven = run(&mut verifier, &frame[..11]);
        let at_twelve = run(&mut verifier, &frame);

        // Assert
        assert_eq!(at_eleven, Verdict::NeedMore { expected: 12 });
        assert_eq!(at_twelve, Verdict::Complete);
    }

    #[test]
    fn test_routing_length_grows_from_count_byte() {
        // Arrange
        let mut verifier = TsiVerifier::default();

        // Act
        let after_kind = run(&mut verifier, &[0x00, 0x08]);
        let after_count = run(&mut verifier, &[0x00, 0x08, 9]);

        // Assert
        assert_eq!(after_kind, Verdict::NeedMore { expected: 3 });
        assert_eq!(after_count, Verdict::NeedMore { expected: 12 });
    }

    #[test]
    fn test_battery_frame_completes_after_header() {
        let mut verifier = TsiVerifier::default();

        assert_eq!(run(&mut verifier, &[0x00, 0x01]), Verdict::Complete);
    }

    #[test]
    fn test_unknown_header_kind_is_invalid() {
        let mut verifier = TsiVerifier::default();

        assert_eq!(run(&mut verifier, &[0x00, 0x77]), Verdict::Invalid);
    }

    #[test]
    fn test_key_frame_boundary_found_by_signatures() {
        // Arrange
        let mut verifier = TsiVerifier::default();

        // Act
        let navigator = run(&mut verifier, &[0x61, 0xE2]);
        let power_braille = run(&mut verifier, &[0x41, 0xC0, 0x20, 0xA0, 0x60, 0xE0]);

        // Assert
        assert_eq!(navigator, Verdict::Complete);
        assert_eq!(power_braille, Verdict::Complete);
    }

    #[test]
    fn test_key_byte_with_wrong_signature_is_invalid() {
        let mut verifier = TsiVerifier::default();

        assert_eq!(run(&mut verifier, &[0x41, 0xE0]), Verdict::Invalid);
    }

    #[test]
    fn test_decode_identity_exposes_hardware_version() {
        // Arrange
        let frame = [0x00, 0x05, 40, 8, b'V', b'4', b'.', b'1', 1, 2, 3, 4];

        // Act
        let message = decode_frame(&frame).expect("valid identity");

        // Assert
        match message {
            TsiMessage::Identity(identity) => {
                assert_eq!(identity.columns, 40);
                assert_eq!(identity.hardware_version(), [b'4', b'.', b'1']);
                assert_eq!(identity.version_string(), "4.1");
            }
            other => panic!("expected identity, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_routing_keeps_all_sensor_bytes() {
        let frame = [0x00, 0x08, 2, 0xAA, 0x55];

        assert_eq!(
            decode_frame(&frame),
            Ok(TsiMessage::Routing {
                count: 2,
                sensors: vec![0xAA, 0x55]
            })
        );
    }

    #[test]
    fn test_cells_packet_interleaves_attribute_bytes() {
        // Act
        let packet = cells_packet(3, &[0x11, 0x22]).expect("fits");

        // Assert
        assert_eq!(
            packet,
            vec![0xFF, 0xFF, 0x04, 0x00, 0x99, 0x00, 4, 3, 0x00, 0x11, 0x00, 0x22]
        );
    }

    #[test]
    fn test_cells_packet_rejects_more_than_127_cells() {
        assert!(matches!(
            cells_packet(0, &[0u8; 128]),
            Err(ProtocolError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn test_baud_change_request_only_for_supported_rates() {
        assert_eq!(baud_change_request(19200), Some([0xFF, 0xFF, 0x05, 4]));
        assert_eq!(baud_change_request(115200), None);
    }

    #[test]
    fn test_assembler_resyncs_on_key_byte_that_restarts_a_frame() {
        // Arrange – a Navigator frame cut short by a fresh first key byte
        let mut assembler = FrameAssembler::new(TsiVerifier::default());
        assembler.feed(&[0x61, 0x62, 0xE3]);

        // Act
        let first = assembler.next_frame();
        let second = assembler.next_frame();

        // Assert
        assert_eq!(
            first,
            Some(Err(ProtocolError::InvalidFrame {
                discarded: vec![0x61]
            }))
        );
        assert_eq!(second, Some(Ok(vec![0x62, 0xE3])));
    }
}
