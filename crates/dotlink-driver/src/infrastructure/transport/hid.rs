//! HID devices through `hidapi`.

use std::time::Duration;

use hidapi::{HidApi, HidDevice, HidError};
use tracing::{debug, info};

use crate::application::channel::{ReportChannel, TransportError};

fn hid_error(err: HidError) -> TransportError {
    TransportError::Io(std::io::Error::new(std::io::ErrorKind::Other, err.to_string()))
}

/// An open HID device.
pub struct HidChannel {
    device: Option<HidDevice>,
}

impl HidChannel {
    /// Opens the first device with the given ids.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Open`] if hidapi cannot be initialised or
    /// no such device is attached.
    pub fn open(vendor_id: u16, product_id: u16) -> Result<Self, TransportError> {
        let open_error = |err: HidError| TransportError::Open {
            link: format!("hid:{vendor_id:04X}:{product_id:04X}"),
            reason: err.to_string(),
        };

        let api = HidApi::new().map_err(open_error)?;
        let device = api.open(vendor_id, product_id).map_err(open_error)?;

        info!(
            vendor = format_args!("{vendor_id:04X}"),
            product = format_args!("{product_id:04X}"),
            "HID device opened"
        );
        Ok(Self { device: Some(device) })
    }

    fn device(&self) -> Result<&HidDevice, TransportError> {
        self.device.as_ref().ok_or(TransportError::Closed)
    }
}

impl ReportChannel for HidChannel {
    fn get_feature(&mut self, report_id: u8, buf: &mut [u8]) -> Result<usize, TransportError> {
        let device = self.device()?;
        if buf.is_empty() {
            return Ok(0);
        }
        buf[0] = report_id;
        device.get_feature_report(buf).map_err(hid_error)
    }

    fn write_report(&mut self, report: &[u8]) -> Result<(), TransportError> {
        let device = self.device()?;
        let written = device.write(report).map_err(hid_error)?;
        if written < report.len() {
            debug!(written, expected = report.len(), "short HID write");
        }
        Ok(())
    }

    fn read_report(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        let device = self.device()?;
        let millis = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        device.read_timeout(buf, millis).map_err(hid_error)
    }

    fn close(&mut self) {
        if self.device.take().is_some() {
            debug!("HID device closed");
        }
    }
}
