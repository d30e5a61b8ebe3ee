//! Protocol back-ends, one per display family.
//!
//! A back-end owns the opened channel and everything protocol specific:
//! how to ask the display who it is, how link speed changes are requested,
//! how cells are packed into packets and how inbound frames map to
//! [`InputReport`]s.  The session drives negotiation and the key pipeline
//! generically on top of the [`DisplayBackend`] trait.

pub mod humanware;
pub mod humanware_hid;
pub mod tsi;

use std::time::{Duration, Instant};

use dotlink_core::domain::profile::CapabilityError;
use dotlink_core::keys::bitfield::KeyByteDescriptor;
use dotlink_core::{hex_dump, DeviceProfile, FrameAssembler, KeyGroup, PacketVerifier, ProtocolError, ProtocolFamily};
use thiserror::Error;
use tracing::{debug, trace};

use super::channel::{Channel, LinkParameters, StreamChannel, TransportError};

/// Size of the scratch buffer used for each transport read.
const READ_CHUNK: usize = 64;

/// Failure to send cells.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The cells could not be packed into a packet.
    #[error(transparent)]
    Encode(#[from] ProtocolError),
}

/// What the display told us during identification.
#[derive(Debug, Clone)]
pub struct Identity {
    pub profile: DeviceProfile,
    pub firmware: String,
    /// Set when the reported capabilities matched no known model and a
    /// best-effort profile was chosen instead.
    pub capability_warning: Option<CapabilityError>,
}

/// One decoded piece of input from the display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputReport {
    /// Full snapshot of a group as signature-tagged bytes.
    KeyBitfield {
        group: KeyGroup,
        bytes: Vec<u8>,
        descriptors: &'static [KeyByteDescriptor],
    },
    /// Routing sensor vector as received, with its declared byte count.
    RoutingSensors { declared: usize, sensors: Vec<u8> },
    /// A single key went down or up.
    KeyChange { group: KeyGroup, key: u8, press: bool },
    LowBattery,
    /// Bytes that were dropped or made no sense.
    Malformed(ProtocolError),
}

/// Protocol-specific half of a session.
pub trait DisplayBackend: Send {
    fn family(&self) -> ProtocolFamily;

    /// How long to wait for an identification reply by default.
    fn identify_timeout(&self) -> Duration;

    /// Current line settings, for links that have any.
    fn link_parameters(&self) -> Option<LinkParameters>;

    /// Line settings to try, in order, when the display does not answer
    /// at the initial ones.
    fn alternate_parameters(&self) -> Vec<LinkParameters> {
        Vec::new()
    }

    /// Switches the local end of the link and drops any partial input.
    fn set_link_parameters(&mut self, params: &LinkParameters) -> Result<(), TransportError>;

    /// Sends an identification request and waits up to `timeout` for the
    /// reply.  `Ok(None)` means the display stayed silent.
    fn identify(&mut self, timeout: Duration) -> Result<Option<Identity>, TransportError>;

    /// Faster line settings the identified model can be moved to.
    fn upgrade_parameters(&self, _profile: &DeviceProfile) -> Option<LinkParameters> {
        None
    }

    /// Asks the display to switch to `params`.  Returns `false` if the
    /// display has no way to do so.
    fn request_link_change(&mut self, _params: &LinkParameters) -> Result<bool, TransportError> {
        Ok(false)
    }

    /// Final setup once negotiation has settled.
    fn finish_setup(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Sends `cells` to the display starting at cell `offset`.
    fn write_cells(&mut self, offset: usize, cells: &[u8]) -> Result<(), BackendError>;

    /// Performs one read of at most `timeout` and appends whatever it
    /// decoded to `out`.  Returns the number of bytes read; 0 means the
    /// display had nothing to say.
    fn read_input(&mut self, timeout: Duration, out: &mut Vec<InputReport>) -> Result<usize, TransportError>;

    /// Drops buffered and partially assembled input.
    fn reset_input(&mut self);

    fn close(&mut self);
}

/// Link settings a family starts out with.
pub fn initial_parameters(family: ProtocolFamily) -> Option<LinkParameters> {
    match family {
        ProtocolFamily::HumanWare => Some(humanware::LINK_PARAMETERS),
        ProtocolFamily::HumanWareHid => None,
        ProtocolFamily::Tsi => Some(tsi::NORMAL_LINK),
    }
}

/// Wraps `channel` in the back-end for `family`.
///
/// # Errors
///
/// Returns [`TransportError::Unsupported`] when the channel kind does not
/// fit the protocol, e.g. a byte stream for the HID protocol.
pub fn open_backend(
    family: ProtocolFamily,
    channel: Channel,
    allow_high_baud: bool,
) -> Result<Box<dyn DisplayBackend>, TransportError> {
    match (family, channel) {
        (ProtocolFamily::HumanWare, Channel::Stream(stream)) => {
            Ok(Box::new(humanware::HumanWareBackend::new(stream)))
        }
        (ProtocolFamily::HumanWareHid, Channel::Reports(reports)) => {
            Ok(Box::new(humanware_hid::HumanWareHidBackend::new(reports)))
        }
        (ProtocolFamily::Tsi, Channel::Stream(stream)) => {
            Ok(Box::new(tsi::TsiBackend::new(stream, allow_high_baud)))
        }
        (_, mut channel) => {
            match &mut channel {
                Channel::Stream(stream) => stream.close(),
                Channel::Reports(reports) => reports.close(),
            }
            Err(TransportError::Unsupported("channel kind does not match protocol"))
        }
    }
}

// ── Stream helpers ────────────────────────────────────────────────────────────

/// A byte stream together with its frame assembler.
pub(crate) struct FramedStream<V> {
    channel: Box<dyn StreamChannel>,
    assembler: FrameAssembler<V>,
}

impl<V: PacketVerifier> FramedStream<V> {
    pub(crate) fn new(channel: Box<dyn StreamChannel>, verifier: V) -> Self {
        Self {
            channel,
            assembler: FrameAssembler::new(verifier),
        }
    }

    pub(crate) fn parameters(&self) -> Option<LinkParameters> {
        self.channel.parameters()
    }

    pub(crate) fn reconfigure(&mut self, params: &LinkParameters) -> Result<(), TransportError> {
        self.assembler.reset();
        self.channel.reconfigure(params)
    }

    pub(crate) fn send(&mut self, packet: &[u8]) -> Result<(), TransportError> {
        trace!(packet = %hex_dump(packet), "output packet");
        self.channel.write(packet)
    }

    /// Reads once and feeds the assembler.  Returns the byte count.
    pub(crate) fn fill(&mut self, timeout: Duration) -> Result<usize, TransportError> {
        let mut buf = [0u8; READ_CHUNK];
        let count = self.channel.read(&mut buf, timeout)?;
        if count > 0 {
            trace!(bytes = %hex_dump(&buf[..count]), "input bytes");
            self.assembler.feed(&buf[..count]);
        }
        Ok(count)
    }

    pub(crate) fn next_frame(&mut self) -> Option<Result<Vec<u8>, ProtocolError>> {
        self.assembler.next_frame()
    }

    /// Reads until `accept` recognises a frame or `timeout` runs out.
    /// Frames `accept` rejects are logged and dropped.
    pub(crate) fn await_reply<T>(
        &mut self,
        timeout: Duration,
        mut accept: impl FnMut(&[u8]) -> Option<T>,
    ) -> Result<Option<T>, TransportError> {
        let deadline = Instant::now() + timeout;

        loop {
            while let Some(result) = self.assembler.next_frame() {
                match result {
                    Ok(frame) => match accept(&frame) {
                        Some(reply) => return Ok(Some(reply)),
                        None => debug!(frame = %hex_dump(&frame), "ignored frame while awaiting reply"),
                    },
                    Err(err) => debug!(error = %err, "framing error while awaiting reply"),
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            if self.fill(deadline - now)? == 0 {
                return Ok(None);
            }
        }
    }

    pub(crate) fn reset(&mut self) {
        self.assembler.reset();
    }

    pub(crate) fn close(&mut self) {
        self.assembler.reset();
        self.channel.close();
    }
}
