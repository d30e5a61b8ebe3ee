//! Frame assembly and the wire formats of the supported display families.
//!
//! Inbound bytes are grouped into frames by [`FrameAssembler`], driven by a
//! per-protocol [`PacketVerifier`].  The [`humanware`] and [`tsi`] modules
//! describe each family's frame layout, decoded message types and outbound
//! packet builders.

pub mod assembler;
pub mod humanware;
pub mod tsi;
pub mod verifier;

use thiserror::Error;

pub use assembler::{AssemblerStats, FrameAssembler};
pub use verifier::{PacketVerifier, Verdict};

/// Errors produced while framing or decoding inbound bytes.
///
/// These are never fatal to a session: the offending bytes have already been
/// dropped by the time the error is reported, and the caller logs it and
/// carries on with the next frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A partially assembled frame became invalid and was thrown away.
    #[error("discarded invalid frame: {}", hex_dump(.discarded))]
    InvalidFrame { discarded: Vec<u8> },

    /// A byte arrived that cannot start any frame of this protocol.
    #[error("ignored stray byte 0x{0:02X}")]
    StrayByte(u8),

    /// A frame header announced a length beyond the protocol maximum.
    #[error("frame would need {expected} bytes, protocol limit is {limit}")]
    FrameTooLong { expected: usize, limit: usize },

    /// A complete frame was received but its contents make no sense here.
    #[error("unexpected frame: {}", hex_dump(.0))]
    UnexpectedFrame(Vec<u8>),

    /// An outbound payload does not fit the packet format.
    #[error("payload too large: {len} bytes, limit is {limit}")]
    PayloadTooLarge { len: usize, limit: usize },
}

/// Formats bytes as space separated upper-case hex, the way packets are
/// shown in trace logs.
///
/// ```rust
/// assert_eq!(dotlink_core::hex_dump(&[0x1B, 0x01, 0xFF]), "1B 01 FF");
/// ```
pub fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{byte:02X}"));
    }
    out
}
