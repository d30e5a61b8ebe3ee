//! Signature-tagged key bitfields.
//!
//! Some displays report their key state as a fixed run of bytes where the
//! top three bits of every byte are a tag identifying the byte's position.
//! The remaining bits carry key state, which each [`KeyByteDescriptor`]
//! masks and shifts into a single wide accumulator.

use super::KeySet;

/// The bits of every key byte that hold its positional signature.
pub const SIGNATURE_MASK: u8 = 0xE0;

/// How one byte of a key bitfield is recognised and unpacked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyByteDescriptor {
    /// Expected value of `byte & SIGNATURE_MASK`.
    pub signature: u8,
    /// Bits that represent keys.
    pub mask: u8,
    /// Where the masked bits land in the accumulator.
    pub shift: u8,
}

impl KeyByteDescriptor {
    pub const fn new(signature: u8, mask: u8, shift: u8) -> Self {
        Self { signature, mask, shift }
    }

    pub fn matches(&self, byte: u8) -> bool {
        byte & SIGNATURE_MASK == self.signature
    }
}

/// Returns the position of the first byte whose signature does not match
/// its descriptor, or the frame length when the lengths differ.
pub fn signature_mismatch(bytes: &[u8], descriptors: &[KeyByteDescriptor]) -> Option<usize> {
    if bytes.len() != descriptors.len() {
        return Some(bytes.len().min(descriptors.len()));
    }
    bytes
        .iter()
        .zip(descriptors)
        .position(|(byte, descriptor)| !descriptor.matches(*byte))
}

/// Masks and shifts every byte into one accumulator.  Signatures are not
/// rechecked; see [`signature_mismatch`].
pub fn accumulate(bytes: &[u8], descriptors: &[KeyByteDescriptor]) -> KeySet {
    let bits = bytes
        .iter()
        .zip(descriptors)
        .fold(0u64, |acc, (byte, d)| acc | (u64::from(byte & d.mask) << d.shift));
    KeySet::from_bits(bits)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_BYTES: [KeyByteDescriptor; 2] = [
        KeyByteDescriptor::new(0x60, 0x1F, 0),
        KeyByteDescriptor::new(0xE0, 0x1F, 5),
    ];

    #[test]
    fn test_accumulate_masks_and_shifts_each_byte() {
        // Arrange – key 0 in the first byte, key 5 + 9 in the second
        let bytes = [0x60 | 0x01, 0xE0 | 0x11];

        // Act
        let set = accumulate(&bytes, &TWO_BYTES);

        // Assert
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![0, 5, 9]);
    }

    #[test]
    fn test_signature_mismatch_reports_position() {
        assert_eq!(signature_mismatch(&[0x61, 0x41], &TWO_BYTES), Some(1));
        assert_eq!(signature_mismatch(&[0x61, 0xE1], &TWO_BYTES), None);
    }

    #[test]
    fn test_signature_mismatch_on_short_frame() {
        assert_eq!(signature_mismatch(&[0x61], &TWO_BYTES), Some(1));
    }
}
