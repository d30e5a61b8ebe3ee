//! Transport adapters.
//!
//! | Link        | Module     | Crate        | Channel kind |
//! |-------------|------------|--------------|--------------|
//! | RS-232      | [`serial`] | `serialport` | stream       |
//! | Bluetooth   | [`serial`] | `serialport` | stream       |
//! | USB bulk    | [`usb`]    | `nusb`       | stream       |
//! | USB HID     | [`hid`]    | `hidapi`     | reports      |
//!
//! [`SystemConnector`] dispatches a [`LinkSpec`] to the right adapter.
//! [`mock`] provides a scripted display used by the integration tests.

pub mod hid;
pub mod mock;
pub mod serial;
pub mod usb;

use tracing::debug;

use crate::application::channel::{Channel, Connector, LinkParameters, LinkSpec, TransportError};

/// Opens real OS transports.
#[derive(Debug, Default)]
pub struct SystemConnector;

impl SystemConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for SystemConnector {
    fn open(&self, link: &LinkSpec, params: Option<LinkParameters>) -> Result<Channel, TransportError> {
        debug!(%link, params = ?params, "opening link");
        match link {
            LinkSpec::Serial { path } => {
                let port = serial::SerialChannel::open(path, params.unwrap_or(serial::DEFAULT_PARAMETERS))?;
                Ok(Channel::Stream(Box::new(port)))
            }
            LinkSpec::Bluetooth { device, channel } => {
                let port = serial::SerialChannel::open_rfcomm(device, *channel, params)?;
                Ok(Channel::Stream(Box::new(port)))
            }
            LinkSpec::Usb(endpoints) => {
                let usb = usb::UsbChannel::open(endpoints, params)?;
                Ok(Channel::Stream(Box::new(usb)))
            }
            LinkSpec::Hid {
                vendor_id,
                product_id,
            } => {
                let device = hid::HidChannel::open(*vendor_id, *product_id)?;
                Ok(Channel::Reports(Box::new(device)))
            }
        }
    }
}
