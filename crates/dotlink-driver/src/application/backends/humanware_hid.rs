//! HumanWare Brailliant over the HID protocol.
//!
//! Identification reads the capabilities feature report; cells are sent as
//! an output report.  Key input over HID is not decoded: input reports are
//! read and discarded so they do not pile up in the OS buffer.

use std::time::Duration;

use dotlink_core::domain::profile::CapabilityError;
use dotlink_core::protocol::humanware::hid::{self, Capabilities};
use dotlink_core::{hex_dump, DeviceProfile, ProtocolFamily};
use tracing::{info, trace};

use super::{BackendError, DisplayBackend, Identity, InputReport};
use crate::application::channel::{LinkParameters, ReportChannel, TransportError};

/// Largest report the firmware sends.
const REPORT_BUFFER: usize = 64;

pub struct HumanWareHidBackend {
    channel: Box<dyn ReportChannel>,
}

impl HumanWareHidBackend {
    pub fn new(channel: Box<dyn ReportChannel>) -> Self {
        Self { channel }
    }
}

impl DisplayBackend for HumanWareHidBackend {
    fn family(&self) -> ProtocolFamily {
        ProtocolFamily::HumanWareHid
    }

    /// Feature reads are synchronous, so there is nothing to wait for.
    fn identify_timeout(&self) -> Duration {
        Duration::ZERO
    }

    fn link_parameters(&self) -> Option<LinkParameters> {
        None
    }

    fn set_link_parameters(&mut self, _params: &LinkParameters) -> Result<(), TransportError> {
        Err(TransportError::Unsupported("link parameters on a HID device"))
    }

    fn identify(&mut self, _timeout: Duration) -> Result<Option<Identity>, TransportError> {
        let mut buf = [0u8; REPORT_BUFFER];
        let length = self.channel.get_feature(hid::CAPABILITIES_REPORT, &mut buf)?;
        if length == 0 {
            return Ok(None);
        }
        trace!(report = %hex_dump(&buf[..length]), "capabilities report");

        let capabilities = Capabilities::parse(&buf[..length]);
        let firmware = capabilities.firmware();
        let cells = capabilities.cell_count as usize;
        info!(%firmware, cells, "detected HumanWare HID display");

        Ok(Some(Identity {
            profile: DeviceProfile::humanware(ProtocolFamily::HumanWareHid, None, cells),
            firmware,
            capability_warning: (cells == 0).then_some(CapabilityError::UnsupportedCellCount(0)),
        }))
    }

    fn write_cells(&mut self, _offset: usize, cells: &[u8]) -> Result<(), BackendError> {
        let report = hid::write_cells_report(cells)?;
        trace!(report = %hex_dump(&report), "output report");
        self.channel.write_report(&report)?;
        Ok(())
    }

    fn read_input(&mut self, timeout: Duration, _out: &mut Vec<InputReport>) -> Result<usize, TransportError> {
        let mut buf = [0u8; REPORT_BUFFER];
        let length = self.channel.read_report(&mut buf, timeout)?;
        if length > 0 {
            trace!(report = %hex_dump(&buf[..length]), "input report ignored");
        }
        Ok(length)
    }

    fn reset_input(&mut self) {}

    fn close(&mut self) {
        self.channel.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::channel::MockReportChannel;

    #[test]
    fn test_identify_reads_capabilities_feature_report() {
        // Arrange
        let mut channel = MockReportChannel::new();
        channel
            .expect_get_feature()
            .withf(|id, _| *id == hid::CAPABILITIES_REPORT)
            .returning(|_, buf| {
                let report = [hid::CAPABILITIES_REPORT, b'1', b'0', b'2', b'3', 40];
                buf[..report.len()].copy_from_slice(&report);
                Ok(report.len())
            });
        let mut backend = HumanWareHidBackend::new(Box::new(channel));

        // Act
        let identity = backend
            .identify(Duration::ZERO)
            .expect("no transport error")
            .expect("display answered");

        // Assert
        assert_eq!(identity.profile.cell_count, 40);
        assert_eq!(identity.profile.family, ProtocolFamily::HumanWareHid);
        assert_eq!(identity.firmware, "1.0.23");
    }

    #[test]
    fn test_write_cells_sends_output_report() {
        // Arrange
        let mut channel = MockReportChannel::new();
        channel
            .expect_write_report()
            .withf(|report| report == [hid::WRITE_CELLS_REPORT, 1, 0, 3, 7, 8, 9])
            .times(1)
            .returning(|_| Ok(()));
        let mut backend = HumanWareHidBackend::new(Box::new(channel));

        // Act / Assert
        backend.write_cells(0, &[7, 8, 9]).expect("write succeeds");
    }

    #[test]
    fn test_link_parameters_are_not_supported() {
        let backend_channel = MockReportChannel::new();
        let mut backend = HumanWareHidBackend::new(Box::new(backend_channel));

        let result = backend.set_link_parameters(&LinkParameters::new(9600, crate::Parity::None));

        assert!(matches!(result, Err(TransportError::Unsupported(_))));
    }
}
