//! Transport channel abstraction.
//!
//! Displays are reached either as a byte stream (serial, USB bulk,
//! Bluetooth RFCOMM) or through HID reports.  The session never sees a
//! concrete transport; it receives a [`Channel`] from a [`Connector`] and
//! talks to the trait object inside.
//!
//! # Timeouts (for beginners)
//!
//! Every read takes an explicit timeout and returns `Ok(0)` when it
//! expires.  "No data yet" is not an error: the session polls on a fixed
//! tick and simply tries again next time.  Only real failures (the device
//! was unplugged, the OS reported an I/O error) come back as
//! [`TransportError`].

use std::fmt;
use std::io;
use std::time::Duration;

use dotlink_core::ProtocolFamily;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by transports.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The operating system reported an I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The device went away.
    #[error("device disconnected")]
    Disconnected,

    /// The transport could not be opened.
    #[error("cannot open {link}: {reason}")]
    Open { link: String, reason: String },

    /// The channel does not support the requested operation.
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    /// The channel was closed locally.
    #[error("channel closed")]
    Closed,
}

impl TransportError {
    /// True for failures worth retrying on the next tick rather than
    /// treating the device as lost.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::Io(err) if matches!(
                err.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
            )
        )
    }
}

// ── Link parameters ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Even,
    Odd,
}

/// Line settings of a serial-like link.  Always 8 data bits, 1 stop bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkParameters {
    pub baud: u32,
    pub parity: Parity,
}

impl LinkParameters {
    pub const fn new(baud: u32, parity: Parity) -> Self {
        Self { baud, parity }
    }

    /// Same parity at a different rate.
    pub const fn with_baud(self, baud: u32) -> Self {
        Self { baud, ..self }
    }
}

impl fmt::Display for LinkParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Even => 'E',
            Parity::Odd => 'O',
        };
        write!(f, "{} 8{}1", self.baud, parity)
    }
}

// ── Channel traits ────────────────────────────────────────────────────────────

/// A bidirectional byte stream.
#[cfg_attr(test, mockall::automock)]
pub trait StreamChannel: Send {
    /// Reads up to `buf.len()` bytes, waiting at most `timeout`.  Returns
    /// `Ok(0)` if nothing arrived in time.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError>;

    /// Writes all of `bytes`.
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Switches line settings.  Bytes buffered under the old settings are
    /// discarded.
    fn reconfigure(&mut self, params: &LinkParameters) -> Result<(), TransportError>;

    /// Current line settings, if the link has any.
    fn parameters(&self) -> Option<LinkParameters>;

    /// Releases the underlying handle.  Later calls fail with
    /// [`TransportError::Closed`].
    fn close(&mut self);
}

/// A HID device exchanging numbered reports.
#[cfg_attr(test, mockall::automock)]
pub trait ReportChannel: Send {
    /// Reads feature report `report_id` into `buf`, returning its length.
    fn get_feature(&mut self, report_id: u8, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Sends an output report; the first byte is the report id.
    fn write_report(&mut self, report: &[u8]) -> Result<(), TransportError>;

    /// Reads one input report, waiting at most `timeout`.  Returns `Ok(0)` if
    /// nothing arrived in time.
    fn read_report(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError>;

    fn close(&mut self);
}

/// An opened transport.
pub enum Channel {
    Stream(Box<dyn StreamChannel>),
    Reports(Box<dyn ReportChannel>),
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Stream(_) => f.write_str("Channel::Stream"),
            Channel::Reports(_) => f.write_str("Channel::Reports"),
        }
    }
}

// ── Connect descriptor ────────────────────────────────────────────────────────

/// USB device and the interface carrying the serial protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbEndpoints {
    pub vendor_id: u16,
    pub product_id: u16,
    pub configuration: u8,
    pub interface: u8,
    pub alternate_setting: u8,
    /// Endpoint numbers without the direction bit.
    pub input_endpoint: u8,
    pub output_endpoint: u8,
}

/// Where a display might be found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkSpec {
    Serial { path: String },
    Usb(UsbEndpoints),
    Hid { vendor_id: u16, product_id: u16 },
    /// An RFCOMM channel bound to a tty device.
    Bluetooth { device: String, channel: u8 },
}

impl fmt::Display for LinkSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkSpec::Serial { path } => write!(f, "serial:{path}"),
            LinkSpec::Usb(usb) => write!(f, "usb:{:04X}:{:04X}", usb.vendor_id, usb.product_id),
            LinkSpec::Hid {
                vendor_id,
                product_id,
            } => write!(f, "hid:{vendor_id:04X}:{product_id:04X}"),
            LinkSpec::Bluetooth { device, channel } => write!(f, "bluetooth:{device}#{channel}"),
        }
    }
}

/// One entry of the ordered connect descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectCandidate {
    pub link: LinkSpec,
    pub protocol: ProtocolFamily,
}

/// Opens transports named by a [`LinkSpec`].
#[cfg_attr(test, mockall::automock)]
pub trait Connector {
    /// Opens `link`, applying `params` to serial-like links.
    fn open(&self, link: &LinkSpec, params: Option<LinkParameters>) -> Result<Channel, TransportError>;
}
