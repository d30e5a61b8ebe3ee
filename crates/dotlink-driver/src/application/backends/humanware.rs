//! HumanWare Brailliant over the serial protocol (RS-232, USB bulk,
//! Bluetooth).

use std::time::Duration;

use dotlink_core::protocol::humanware::{self, HumanWareMessage, HumanWareVerifier, ROUTING_BASE};
use dotlink_core::domain::profile::CapabilityError;
use dotlink_core::{DeviceProfile, KeyGroup, ProtocolError, ProtocolFamily};
use tracing::{debug, info, warn};

use super::{BackendError, DisplayBackend, FramedStream, Identity, InputReport};
use crate::application::channel::{LinkParameters, Parity, StreamChannel, TransportError};

pub const LINK_PARAMETERS: LinkParameters = LinkParameters::new(115_200, Parity::Even);

pub const IDENTIFY_TIMEOUT: Duration = Duration::from_millis(1000);

pub struct HumanWareBackend {
    stream: FramedStream<HumanWareVerifier>,
}

impl HumanWareBackend {
    pub fn new(channel: Box<dyn StreamChannel>) -> Self {
        Self {
            stream: FramedStream::new(channel, HumanWareVerifier::default()),
        }
    }
}

/// Splits a key id into its group and index within the group.
pub fn key_position(id: u8) -> (KeyGroup, u8) {
    if id < ROUTING_BASE {
        (KeyGroup::Navigation, id)
    } else {
        (KeyGroup::Routing, id - ROUTING_BASE)
    }
}

impl DisplayBackend for HumanWareBackend {
    fn family(&self) -> ProtocolFamily {
        ProtocolFamily::HumanWare
    }

    fn identify_timeout(&self) -> Duration {
        IDENTIFY_TIMEOUT
    }

    fn link_parameters(&self) -> Option<LinkParameters> {
        self.stream.parameters()
    }

    fn set_link_parameters(&mut self, params: &LinkParameters) -> Result<(), TransportError> {
        self.stream.reconfigure(params)
    }

    fn identify(&mut self, timeout: Duration) -> Result<Option<Identity>, TransportError> {
        self.stream.send(&humanware::identify_request())?;

        let reply = self.stream.await_reply(timeout, |frame| match humanware::decode_frame(frame) {
            Ok(HumanWareMessage::InitResponse(init)) => Some(init),
            _ => None,
        })?;

        Ok(reply.map(|init| {
            info!(model = init.model_id, cells = init.cell_count, "detected HumanWare display");
            if init.communication_disabled {
                warn!("display reports its communication channel as unavailable");
            }

            let cells = init.cell_count as usize;
            Identity {
                profile: DeviceProfile::humanware(ProtocolFamily::HumanWare, Some(init.model_id), cells),
                firmware: init.firmware(),
                capability_warning: (cells == 0).then_some(CapabilityError::UnsupportedCellCount(0)),
            }
        }))
    }

    /// Brailliant displays always take the whole row, so `offset` is
    /// expected to be 0.
    fn write_cells(&mut self, offset: usize, cells: &[u8]) -> Result<(), BackendError> {
        if offset != 0 {
            debug!(offset, "partial row write sent as a full DISPLAY packet");
        }
        let packet = humanware::display_packet(cells)?;
        self.stream.send(&packet)?;
        Ok(())
    }

    fn read_input(&mut self, timeout: Duration, out: &mut Vec<InputReport>) -> Result<usize, TransportError> {
        let count = self.stream.fill(timeout)?;

        while let Some(result) = self.stream.next_frame() {
            let frame = match result {
                Ok(frame) => frame,
                Err(err) => {
                    out.push(InputReport::Malformed(err));
                    continue;
                }
            };

            match humanware::decode_frame(&frame) {
                Ok(HumanWareMessage::KeyDown(id)) => {
                    let (group, key) = key_position(id);
                    out.push(InputReport::KeyChange { group, key, press: true });
                }
                Ok(HumanWareMessage::KeyUp(id)) => {
                    let (group, key) = key_position(id);
                    out.push(InputReport::KeyChange { group, key, press: false });
                }
                Ok(HumanWareMessage::InitResponse(_)) => debug!("late identification reply ignored"),
                Ok(HumanWareMessage::Other { .. }) => {
                    out.push(InputReport::Malformed(ProtocolError::UnexpectedFrame(frame)));
                }
                Err(err) => out.push(InputReport::Malformed(err)),
            }
        }

        Ok(count)
    }

    fn reset_input(&mut self) {
        self.stream.reset();
    }

    fn close(&mut self) {
        self.stream.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::channel::MockStreamChannel;
    use dotlink_core::protocol::humanware::ESC;

    #[test]
    fn test_key_ids_at_routing_base_map_to_routing_group() {
        assert_eq!(key_position(0x0A), (KeyGroup::Navigation, 0x0A));
        assert_eq!(key_position(ROUTING_BASE), (KeyGroup::Routing, 0));
        assert_eq!(key_position(ROUTING_BASE + 39), (KeyGroup::Routing, 39));
    }

    #[test]
    fn test_identify_sends_init_and_reads_cell_count() {
        // Arrange
        let mut channel = MockStreamChannel::new();
        channel
            .expect_write()
            .withf(|bytes| bytes == [ESC, 0x00, 0x00])
            .times(1)
            .returning(|_| Ok(()));
        channel.expect_read().times(1).returning(|buf, _| {
            let reply = [ESC, 0x01, 7, 1, 2, 3, 4, 0, 0x05, 32];
            buf[..reply.len()].copy_from_slice(&reply);
            Ok(reply.len())
        });
        let mut backend = HumanWareBackend::new(Box::new(channel));

        // Act
        let identity = backend.identify(IDENTIFY_TIMEOUT).expect("no transport error");

        // Assert
        let identity = identity.expect("display answered");
        assert_eq!(identity.profile.cell_count, 32);
        assert_eq!(identity.firmware, "stm 1.2 / bt 3.4");
        assert!(identity.capability_warning.is_none());
    }

    #[test]
    fn test_identify_returns_none_when_display_is_silent() {
        // Arrange
        let mut channel = MockStreamChannel::new();
        channel.expect_write().returning(|_| Ok(()));
        channel.expect_read().returning(|_, _| Ok(0));
        let mut backend = HumanWareBackend::new(Box::new(channel));

        // Act
        let identity = backend.identify(IDENTIFY_TIMEOUT).expect("no transport error");

        // Assert
        assert!(identity.is_none());
    }

    #[test]
    fn test_read_input_turns_key_messages_into_changes() {
        // Arrange
        let mut channel = MockStreamChannel::new();
        channel.expect_read().times(1).returning(|buf, _| {
            let bytes = [ESC, 0x05, 1, 0x52, ESC, 0x06, 1, 0x02];
            buf[..bytes.len()].copy_from_slice(&bytes);
            Ok(bytes.len())
        });
        let mut backend = HumanWareBackend::new(Box::new(channel));
        let mut reports = Vec::new();

        // Act
        let count = backend
            .read_input(Duration::from_millis(1), &mut reports)
            .expect("read succeeds");

        // Assert
        assert_eq!(count, 8);
        assert_eq!(
            reports,
            vec![
                InputReport::KeyChange {
                    group: KeyGroup::Routing,
                    key: 2,
                    press: true
                },
                InputReport::KeyChange {
                    group: KeyGroup::Navigation,
                    key: 0x02,
                    press: false
                },
            ]
        );
    }

    #[test]
    fn test_write_cells_sends_display_packet() {
        // Arrange
        let mut channel = MockStreamChannel::new();
        channel
            .expect_write()
            .withf(|bytes| bytes == [ESC, 0x02, 2, 0xFF, 0x00])
            .times(1)
            .returning(|_| Ok(()));
        let mut backend = HumanWareBackend::new(Box::new(channel));

        // Act / Assert
        backend.write_cells(0, &[0xFF, 0x00]).expect("write succeeds");
    }
}
