//! The per-protocol hook consulted by [`super::FrameAssembler`].

/// Outcome of checking a frame after one more byte has been appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The frame is plausible so far.  `expected` is the current best guess
    /// of its total length and may grow as header bytes are seen.
    NeedMore { expected: usize },
    /// The frame is complete and can be handed to the decoder.
    Complete,
    /// The byte just appended cannot belong to this frame.
    Invalid,
}

impl Verdict {
    /// `Complete` once `len` has reached `expected`, otherwise `NeedMore`.
    pub fn from_progress(len: usize, expected: usize) -> Self {
        if len >= expected {
            Verdict::Complete
        } else {
            Verdict::NeedMore { expected }
        }
    }
}

/// Protocol-specific incremental frame checker.
///
/// The assembler calls [`verify`](PacketVerifier::verify) once per appended
/// byte with the whole frame so far.  A call with a one-byte frame marks the
/// start of a new frame, so implementations reset any per-frame state there.
pub trait PacketVerifier {
    /// The largest frame this protocol can legally produce.
    fn max_frame_len(&self) -> usize;

    /// Classifies `frame`, whose last byte has just been appended.
    fn verify(&mut self, frame: &[u8]) -> Verdict;
}

impl<V: PacketVerifier + ?Sized> PacketVerifier for Box<V> {
    fn max_frame_len(&self) -> usize {
        (**self).max_frame_len()
    }

    fn verify(&mut self, frame: &[u8]) -> Verdict {
        (**self).verify(frame)
    }
}
