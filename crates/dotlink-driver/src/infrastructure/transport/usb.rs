//! USB bulk endpoints through `nusb`.
//!
//! Brailliant displays carry the serial protocol over a pair of bulk
//! endpoints.  nusb transfers are futures, so each call is driven to
//! completion on a private current-thread runtime with a tokio timeout;
//! dropping a timed-out transfer cancels it.

use std::io;
use std::time::Duration;

use nusb::transfer::{RequestBuffer, TransferError};
use nusb::Interface;
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, info};

use crate::application::channel::{LinkParameters, StreamChannel, TransportError, UsbEndpoints};

/// Direction bit of IN endpoint addresses.
const ENDPOINT_IN: u8 = 0x80;

/// Largest bulk packet on a full-speed device.
const MAX_PACKET: usize = 64;

const WRITE_TIMEOUT: Duration = Duration::from_millis(1000);

fn transfer_error(err: TransferError) -> TransportError {
    match err {
        TransferError::Disconnected => TransportError::Disconnected,
        TransferError::Cancelled => TransportError::Io(io::Error::from(io::ErrorKind::TimedOut)),
        other => TransportError::Io(io::Error::new(io::ErrorKind::Other, other)),
    }
}

fn open_error(endpoints: &UsbEndpoints, reason: impl ToString) -> TransportError {
    TransportError::Open {
        link: format!("usb:{:04X}:{:04X}", endpoints.vendor_id, endpoints.product_id),
        reason: reason.to_string(),
    }
}

/// A claimed USB interface used as a byte stream.
pub struct UsbChannel {
    interface: Option<Interface>,
    runtime: Runtime,
    input_endpoint: u8,
    output_endpoint: u8,
    /// USB has no line settings; the parameters the protocol asked for are
    /// only recorded.
    params: Option<LinkParameters>,
}

impl UsbChannel {
    /// Finds the first device matching `endpoints` and claims its interface.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Open`] when no such device is attached or
    /// the interface cannot be claimed.
    pub fn open(endpoints: &UsbEndpoints, params: Option<LinkParameters>) -> Result<Self, TransportError> {
        let info = nusb::list_devices()
            .map_err(|err| open_error(endpoints, err))?
            .find(|d| d.vendor_id() == endpoints.vendor_id && d.product_id() == endpoints.product_id)
            .ok_or_else(|| open_error(endpoints, "no matching device"))?;

        debug!(bus = info.bus_number(), address = info.device_address(), "found USB display");

        let device = info.open().map_err(|err| open_error(endpoints, err))?;
        device
            .set_configuration(endpoints.configuration)
            .map_err(|err| open_error(endpoints, err))?;
        let interface = device
            .detach_and_claim_interface(endpoints.interface)
            .map_err(|err| open_error(endpoints, err))?;
        if endpoints.alternate_setting != 0 {
            interface
                .set_alt_setting(endpoints.alternate_setting)
                .map_err(|err| open_error(endpoints, err))?;
        }

        let runtime = Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|err| open_error(endpoints, err))?;

        info!(
            vendor = format_args!("{:04X}", endpoints.vendor_id),
            product = format_args!("{:04X}", endpoints.product_id),
            interface = endpoints.interface,
            "USB interface claimed"
        );

        Ok(Self {
            interface: Some(interface),
            runtime,
            input_endpoint: endpoints.input_endpoint | ENDPOINT_IN,
            output_endpoint: endpoints.output_endpoint & !ENDPOINT_IN,
            params,
        })
    }

    fn interface(&self) -> Result<&Interface, TransportError> {
        self.interface.as_ref().ok_or(TransportError::Closed)
    }
}

impl StreamChannel for UsbChannel {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        let interface = self.interface()?;
        let request = RequestBuffer::new(buf.len().min(MAX_PACKET));
        let transfer = interface.bulk_in(self.input_endpoint, request);

        let completion = match self.runtime.block_on(async { tokio::time::timeout(timeout, transfer).await }) {
            Ok(completion) => completion,
            Err(_elapsed) => return Ok(0),
        };

        let data = completion.into_result().map_err(transfer_error)?;
        buf[..data.len()].copy_from_slice(&data);
        Ok(data.len())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let interface = self.interface()?;
        let transfer = interface.bulk_out(self.output_endpoint, bytes.to_vec());

        let completion = self
            .runtime
            .block_on(async { tokio::time::timeout(WRITE_TIMEOUT, transfer).await })
            .map_err(|_| TransportError::Io(io::Error::from(io::ErrorKind::TimedOut)))?;

        completion.into_result().map_err(transfer_error)?;
        Ok(())
    }

    fn reconfigure(&mut self, params: &LinkParameters) -> Result<(), TransportError> {
        debug!(%params, "USB link has no line settings, recording only");
        self.params = Some(*params);
        Ok(())
    }

    fn parameters(&self) -> Option<LinkParameters> {
        self.params
    }

    fn close(&mut self) {
        if self.interface.take().is_some() {
            debug!("USB interface released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnect_is_not_transient_but_cancel_is() {
        assert!(matches!(
            transfer_error(TransferError::Disconnected),
            TransportError::Disconnected
        ));
        assert!(transfer_error(TransferError::Cancelled).is_transient());
        assert!(!transfer_error(TransferError::Stall).is_transient());
    }
}
