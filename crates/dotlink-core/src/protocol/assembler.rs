//! Byte-at-a-time frame assembly with resynchronisation.
//!
//! Transports deliver bytes in arbitrary chunks: half a frame, three frames
//! at once, or a frame preceded by line noise.  [`FrameAssembler`] owns the
//! bytes that have been read but not yet consumed and hands out one
//! complete frame at a time.
//!
//! # Resynchronisation (for beginners)
//!
//! When the verifier rejects a byte partway through a frame, the partial
//! frame is discarded and reported once as [`ProtocolError::InvalidFrame`].
//! The rejected byte is then looked at again on its own: if it could start
//! a new frame, assembly restarts from it; otherwise it is dropped along
//! with the partial frame.  A byte that cannot start a frame while nothing
//! is being assembled is reported as [`ProtocolError::StrayByte`].
//!
//! Bytes that follow a completed frame are never lost; they stay queued for
//! the next call to [`FrameAssembler::next_frame`].

use std::collections::VecDeque;

use tracing::trace;

use super::{hex_dump, PacketVerifier, ProtocolError, Verdict};

/// Running counters, mostly useful in logs and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblerStats {
    /// Frames handed out successfully.
    pub frames: u64,
    /// Partial frames thrown away after an invalid byte or oversize header.
    pub discarded_frames: u64,
    /// Bytes dropped because they could not start a frame.
    pub stray_bytes: u64,
}

/// Groups an inbound byte stream into verified frames.
pub struct FrameAssembler<V> {
    verifier: V,
    pending: VecDeque<u8>,
    frame: Vec<u8>,
    stats: AssemblerStats,
}

impl<V: PacketVerifier> FrameAssembler<V> {
    /// Creates an empty assembler driven by `verifier`.
    pub fn new(verifier: V) -> Self {
        let capacity = verifier.max_frame_len();
        Self {
            verifier,
            pending: VecDeque::new(),
            frame: Vec::with_capacity(capacity),
            stats: AssemblerStats::default(),
        }
    }

    /// Queues freshly read bytes for assembly.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.pending.extend(bytes.iter().copied());
    }

    /// Returns the next complete frame, or the next framing error.
    ///
    /// `None` means every queued byte has been consumed and the current
    /// frame (if any) is still incomplete.  Errors are reported one at a
    /// time; call again to continue past them.
    pub fn next_frame(&mut self) -> Option<Result<Vec<u8>, ProtocolError>> {
        let limit = self.verifier.max_frame_len();

        while let Some(byte) = self.pending.pop_front() {
            self.frame.push(byte);

            match self.verifier.verify(&self.frame) {
                Verdict::NeedMore { expected } if expected > limit => {
                    let discarded = std::mem::take(&mut self.frame);
                    self.stats.discarded_frames += 1;
                    trace!(frame = %hex_dump(&discarded), expected, limit, "oversize frame header");
                    return Some(Err(ProtocolError::FrameTooLong { expected, limit }));
                }
                Verdict::NeedMore { .. } => {}
                Verdict::Complete => {
                    self.stats.frames += 1;
                    let frame = std::mem::take(&mut self.frame);
                    trace!(frame = %hex_dump(&frame), "frame assembled");
                    return Some(Ok(frame));
                }
                Verdict::Invalid if self.frame.len() == 1 => {
                    self.frame.clear();
                    self.stats.stray_bytes += 1;
                    return Some(Err(ProtocolError::StrayByte(byte)));
                }
                Verdict::Invalid => {
                    let mut discarded = std::mem::take(&mut self.frame);
                    self.stats.discarded_frames += 1;
                    if self.starts_frame(byte) {
                        // The offending byte gets a second chance as a frame start.
                        discarded.pop();
                        self.pending.push_front(byte);
                    }
                    return Some(Err(ProtocolError::InvalidFrame { discarded }));
                }
            }
        }

        None
    }

    /// Drops the partial frame and every queued byte.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.frame.clear();
    }

    /// The bytes of the frame currently being assembled.
    pub fn partial_frame(&self) -> &[u8] {
        &self.frame
    }

    /// Number of bytes fed but not yet examined.
    pub fn queued(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> AssemblerStats {
        self.stats
    }

    pub fn verifier(&self) -> &V {
        &self.verifier
    }

    fn starts_frame(&mut self, byte: u8) -> bool {
        !matches!(self.verifier.verify(&[byte]), Verdict::Invalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `0xAA <len> <len bytes>`, with at most 4 payload bytes.
    struct LengthPrefixed;

    impl PacketVerifier for LengthPrefixed {
        fn max_frame_len(&self) -> usize {
            6
        }

        fn verify(&mut self, frame: &[u8]) -> Verdict {
            match frame.len() {
                1 if frame[0] == 0xAA => Verdict::NeedMore { expected: 2 },
                1 => Verdict::Invalid,
                2 if frame[1] == 0xAA => Verdict::Invalid,
                2 => Verdict::from_progress(2, 2 + frame[1] as usize),
                n => Verdict::from_progress(n, 2 + frame[1] as usize),
            }
        }
    }

    fn drain(assembler: &mut FrameAssembler<LengthPrefixed>) -> Vec<Result<Vec<u8>, ProtocolError>> {
        std::iter::from_fn(|| assembler.next_frame()).collect()
    }

    #[test]
    fn test_frame_split_across_feeds_is_assembled_once_complete() {
        // Arrange
        let mut assembler = FrameAssembler::new(LengthPrefixed);

        // Act
        assembler.feed(&[0xAA, 0x02, 0x10]);
        let first = assembler.next_frame();
        assembler.feed(&[0x20]);
        let second = assembler.next_frame();

        // Assert
        assert!(first.is_none(), "incomplete frame must not be returned");
        assert_eq!(second, Some(Ok(vec![0xAA, 0x02, 0x10, 0x20])));
    }

    #[test]
    fn test_bytes_after_complete_frame_stay_queued() {
        // Arrange
        let mut assembler = FrameAssembler::new(LengthPrefixed);
        assembler.feed(&[0xAA, 0x00, 0xAA, 0x01, 0x05]);

        // Act
        let first = assembler.next_frame();
        let queued_after_first = assembler.queued();
        let second = assembler.next_frame();

        // Assert
        assert_eq!(first, Some(Ok(vec![0xAA, 0x00])));
        assert_eq!(queued_after_first, 3);
        assert_eq!(second, Some(Ok(vec![0xAA, 0x01, 0x05])));
    }

    #[test]
    fn test_leading_noise_is_reported_byte_by_byte() {
        // Arrange
        let mut assembler = FrameAssembler::new(LengthPrefixed);
        assembler.feed(&[0x01, 0x02, 0xAA, 0x00]);

        // Act
        let results = drain(&mut assembler);

        // Assert
        assert_eq!(
            results,
            vec![
                Err(ProtocolError::StrayByte(0x01)),
                Err(ProtocolError::StrayByte(0x02)),
                Ok(vec![0xAA, 0x00]),
            ]
        );
        assert_eq!(assembler.stats().stray_bytes, 2);
    }

    #[test]
    fn test_offending_byte_that_starts_a_frame_begins_reassembly() {
        // Arrange – second byte 0xAA is invalid as a length but is a valid start
        let mut assembler = FrameAssembler::new(LengthPrefixed);
        assembler.feed(&[0xAA, 0xAA, 0x01, 0x07]);

        // Act
        let results = drain(&mut assembler);

        // Assert
        assert_eq!(
            results,
            vec![
                Err(ProtocolError::InvalidFrame {
                    discarded: vec![0xAA]
                }),
                Ok(vec![0xAA, 0x01, 0x07]),
            ]
        );
    }

    #[test]
    fn test_oversize_length_is_rejected_without_buffering() {
        // Arrange
        let mut assembler = FrameAssembler::new(LengthPrefixed);
        assembler.feed(&[0xAA, 0x09]);

        // Act
        let result = assembler.next_frame();

        // Assert
        assert_eq!(
            result,
            Some(Err(ProtocolError::FrameTooLong {
                expected: 11,
                limit: 6
            }))
        );
        assert!(assembler.partial_frame().is_empty());
    }

    #[test]
    fn test_reset_discards_partial_and_queued_bytes() {
        // Arrange
        let mut assembler = FrameAssembler::new(LengthPrefixed);
        assembler.feed(&[0xAA, 0x03, 0x01]);
        assert!(assembler.next_frame().is_none());
        assembler.feed(&[0x02]);

        // Act
        assembler.reset();
        assembler.feed(&[0xAA, 0x00]);

        // Assert
        assert_eq!(assembler.next_frame(), Some(Ok(vec![0xAA, 0x00])));
    }
}
