//! Serial ports and RFCOMM ttys through the `serialport` crate.

use std::io::{self, Read, Write};
use std::time::Duration;

use serialport::{ClearBuffer, DataBits, FlowControl, SerialPort, StopBits};
use tracing::{debug, info};

use crate::application::channel::{LinkParameters, Parity, StreamChannel, TransportError};

/// Used when a serial link is opened without protocol-specific settings.
pub const DEFAULT_PARAMETERS: LinkParameters = LinkParameters::new(9600, Parity::None);

/// RFCOMM ignores the line speed, but the tty still wants one.
const RFCOMM_PARAMETERS: LinkParameters = LinkParameters::new(115_200, Parity::None);

/// Write timeout; reads take their timeout per call.
const WRITE_TIMEOUT: Duration = Duration::from_millis(500);

fn to_serial_parity(parity: Parity) -> serialport::Parity {
    match parity {
        Parity::None => serialport::Parity::None,
        Parity::Even => serialport::Parity::Even,
        Parity::Odd => serialport::Parity::Odd,
    }
}

fn open_error(path: &str, err: serialport::Error) -> TransportError {
    TransportError::Open {
        link: path.to_string(),
        reason: err.to_string(),
    }
}

/// A byte stream over a tty.
pub struct SerialChannel {
    port: Option<Box<dyn SerialPort>>,
    path: String,
    params: LinkParameters,
}

impl SerialChannel {
    /// Opens `path` at `params`, 8 data bits, 1 stop bit, no flow control.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Open`] if the port cannot be opened.
    pub fn open(path: &str, params: LinkParameters) -> Result<Self, TransportError> {
        let port = serialport::new(path, params.baud)
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .parity(to_serial_parity(params.parity))
            .flow_control(FlowControl::None)
            .timeout(WRITE_TIMEOUT)
            .open()
            .map_err(|err| open_error(path, err))?;

        info!(%path, %params, "serial port opened");
        Ok(Self {
            port: Some(port),
            path: path.to_string(),
            params,
        })
    }

    /// Opens the tty an RFCOMM channel has been bound to.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Open`] if the tty cannot be opened.
    pub fn open_rfcomm(device: &str, channel: u8, params: Option<LinkParameters>) -> Result<Self, TransportError> {
        debug!(%device, channel, "opening RFCOMM tty");
        Self::open(device, params.unwrap_or(RFCOMM_PARAMETERS))
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, TransportError> {
        self.port.as_mut().ok_or(TransportError::Closed)
    }
}

impl StreamChannel for SerialChannel {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        let port = self.port()?;
        port.set_timeout(timeout.max(Duration::from_millis(1)))
            .map_err(io::Error::from)?;

        match port.read(buf) {
            Ok(0) => Err(TransportError::Disconnected),
            Ok(count) => Ok(count),
            Err(err) if err.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(err) => Err(err.into()),
        }
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let port = self.port()?;
        port.set_timeout(WRITE_TIMEOUT).map_err(io::Error::from)?;
        port.write_all(bytes)?;
        port.flush()?;
        Ok(())
    }

    fn reconfigure(&mut self, params: &LinkParameters) -> Result<(), TransportError> {
        let port = self.port()?;
        port.set_baud_rate(params.baud).map_err(io::Error::from)?;
        port.set_parity(to_serial_parity(params.parity))
            .map_err(io::Error::from)?;
        port.clear(ClearBuffer::Input).map_err(io::Error::from)?;

        debug!(path = %self.path, %params, "serial port reconfigured");
        self.params = *params;
        Ok(())
    }

    fn parameters(&self) -> Option<LinkParameters> {
        Some(self.params)
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!(path = %self.path, "serial port closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parity_maps_to_serialport_setting() {
        assert_eq!(to_serial_parity(Parity::None), serialport::Parity::None);
        assert_eq!(to_serial_parity(Parity::Even), serialport::Parity::Even);
        assert_eq!(to_serial_parity(Parity::Odd), serialport::Parity::Odd);
    }

    #[test]
    fn test_opening_missing_port_reports_path() {
        // Act
        let result = SerialChannel::open("/dev/dotlink-does-not-exist", DEFAULT_PARAMETERS);

        // Assert
        match result {
            Err(TransportError::Open { link, .. }) => assert_eq!(link, "/dev/dotlink-does-not-exist"),
            other => panic!("expected open error, got {:?}", other.map(|_| ())),
        }
    }
}
