//! Telesensory Systems Navigator and PowerBraille displays.
//!
//! # Negotiation (for beginners)
//!
//! TSI displays power up at 9600 baud.  PowerBraille models also accept
//! 19200, and a display left at 19200 by a previous session keeps that
//! speed, so when 9600 stays silent we try 19200 before giving up.  Once a
//! model that supports it is identified, the session asks it to switch up
//! with [`tsi::baud_change_request`] and re-queries at the new speed.

use std::time::Duration;

use dotlink_core::protocol::tsi::{self, TsiMessage, TsiVerifier};
use dotlink_core::{DeviceProfile, KeyGroup, ProtocolFamily};
use tracing::{debug, info, warn};

use super::{BackendError, DisplayBackend, FramedStream, Identity, InputReport};
use crate::application::channel::{LinkParameters, Parity, StreamChannel, TransportError};

/// 9600 8N1, the power-on setting of every model.
pub const NORMAL_LINK: LinkParameters = LinkParameters::new(9600, Parity::None);

/// 19200 8N1, supported by PowerBraille models.
pub const HIGH_LINK: LinkParameters = NORMAL_LINK.with_baud(19_200);

/// The display answers a query almost immediately.
pub const IDENTIFY_TIMEOUT: Duration = Duration::from_millis(100);

pub struct TsiBackend {
    stream: FramedStream<TsiVerifier>,
    allow_high_baud: bool,
}

impl TsiBackend {
    pub fn new(channel: Box<dyn StreamChannel>, allow_high_baud: bool) -> Self {
        Self {
            stream: FramedStream::new(channel, TsiVerifier::default()),
            allow_high_baud,
        }
    }

    fn decode_into(&self, frame: Vec<u8>, out: &mut Vec<InputReport>) {
        match tsi::decode_frame(&frame) {
            Ok(TsiMessage::Keys { layout, bytes }) => out.push(InputReport::KeyBitfield {
                group: KeyGroup::Navigation,
                bytes,
                descriptors: layout.descriptors(),
            }),
            Ok(TsiMessage::Routing { count, sensors }) => out.push(InputReport::RoutingSensors {
                declared: count as usize,
                sensors,
            }),
            Ok(TsiMessage::LowBattery) => out.push(InputReport::LowBattery),
            Ok(TsiMessage::Identity(_)) => debug!("late identity reply ignored"),
            Err(err) => out.push(InputReport::Malformed(err)),
        }
    }
}

impl DisplayBackend for TsiBackend {
    fn family(&self) -> ProtocolFamily {
        ProtocolFamily::Tsi
    }

    fn identify_timeout(&self) -> Duration {
        IDENTIFY_TIMEOUT
    }

    fn link_parameters(&self) -> Option<LinkParameters> {
        self.stream.parameters()
    }

    fn alternate_parameters(&self) -> Vec<LinkParameters> {
        if self.allow_high_baud {
            vec![HIGH_LINK]
        } else {
            Vec::new()
        }
    }

    fn set_link_parameters(&mut self, params: &LinkParameters) -> Result<(), TransportError> {
        self.stream.reconfigure(params)
    }

    fn identify(&mut self, timeout: Duration) -> Result<Option<Identity>, TransportError> {
        self.stream.send(&tsi::QUERY_REQUEST)?;

        let reply = self.stream.await_reply(timeout, |frame| match tsi::decode_frame(frame) {
            Ok(TsiMessage::Identity(identity)) => Some(identity),
            _ => None,
        })?;

        Ok(reply.map(|identity| {
            let firmware = identity.version_string();
            info!(cells = identity.columns, version = %firmware, "display replied");

            match DeviceProfile::tsi(&identity) {
                Ok(profile) => Identity {
                    profile,
                    firmware,
                    capability_warning: None,
                },
                Err(err) => {
                    warn!(error = %err, "unrecognised TSI display, using a generic profile");
                    Identity {
                        profile: DeviceProfile::tsi_generic(identity.columns as usize),
                        firmware,
                        capability_warning: Some(err),
                    }
                }
            }
        }))
    }

    fn upgrade_parameters(&self, profile: &DeviceProfile) -> Option<LinkParameters> {
        let current = self.stream.parameters()?;
        (self.allow_high_baud && profile.high_baud && current.baud < HIGH_LINK.baud).then_some(HIGH_LINK)
    }

    fn request_link_change(&mut self, params: &LinkParameters) -> Result<bool, TransportError> {
        match tsi::baud_change_request(params.baud) {
            Some(request) => {
                self.stream.send(&request)?;
                Ok(true)
            }
            None => {
                warn!(baud = params.baud, "display has no code for this line speed");
                Ok(false)
            }
        }
    }

    fn finish_setup(&mut self) -> Result<(), TransportError> {
        self.stream.send(&tsi::typematic_request())
    }

    fn write_cells(&mut self, offset: usize, cells: &[u8]) -> Result<(), BackendError> {
        let packet = tsi::cells_packet(offset, cells)?;
        self.stream.send(&packet)?;
        Ok(())
    }

    fn read_input(&mut self, timeout: Duration, out: &mut Vec<InputReport>) -> Result<usize, TransportError> {
        let count = self.stream.fill(timeout)?;

        while let Some(result) = self.stream.next_frame() {
            match result {
                Ok(frame) => self.decode_into(frame, out),
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

    fn identity_reply(columns: u8, version: &[u8; 4]) -> Vec<u8> {
        let mut reply = vec![tsi::HEADER, tsi::IDENTITY_KIND, columns, 2];
        reply.extend_from_slice(version);
        reply.extend_from_slice(&[0, 0, 0, 0]);
        reply
    }

    /// A channel that answers every query with `reply` at 9600 baud.
    fn answering_channel(reply: Vec<u8>) -> MockStreamChannel {
        let mut channel = MockStreamChannel::new();
        channel.expect_write().returning(|_| Ok(()));
        channel.expect_parameters().returning(|| Some(NORMAL_LINK));
        let mut sent = false;
        channel.expect_read().returning(move |buf, _| {
            if sent {
                return Ok(0);
            }
            sent = true;
            buf[..reply.len()].copy_from_slice(&reply);
            Ok(reply.len())
        });
        channel
    }

    #[test]
    fn test_identify_selects_power_braille_40_by_hardware_version() {
        // Arrange
        let channel = answering_channel(identity_reply(40, b"V4.0"));
        let mut backend = TsiBackend::new(Box::new(channel), true);

        // Act
        let identity = backend
            .identify(IDENTIFY_TIMEOUT)
            .expect("no transport error")
            .expect("display answered");

        // Assert
        assert_eq!(identity.profile.model, "PowerBraille 40");
        assert_eq!(identity.firmware, "4.0");
        assert!(identity.capability_warning.is_none());
        assert_eq!(backend.upgrade_parameters(&identity.profile), Some(HIGH_LINK));
    }

    #[test]
    fn test_identify_falls_back_to_generic_profile_for_unknown_width() {
        // Arrange
        let channel = answering_channel(identity_reply(32, b"V2.1"));
        let mut backend = TsiBackend::new(Box::new(channel), true);

        // Act
        let identity = backend
            .identify(IDENTIFY_TIMEOUT)
            .expect("no transport error")
            .expect("display answered");

        // Assert
        assert_eq!(identity.profile.cell_count, 32);
        assert!(identity.profile.routing.is_none());
        assert!(identity.capability_warning.is_some());
        assert_eq!(backend.upgrade_parameters(&identity.profile), None);
    }

    #[test]
    fn test_high_baud_disabled_means_no_alternate_or_upgrade() {
        // Arrange
        let channel = answering_channel(identity_reply(40, b"V4.0"));
        let mut backend = TsiBackend::new(Box::new(channel), false);

        // Act
        let identity = backend
            .identify(IDENTIFY_TIMEOUT)
            .expect("no transport error")
            .expect("display answered");

        // Assert
        assert!(backend.alternate_parameters().is_empty());
        assert_eq!(backend.upgrade_parameters(&identity.profile), None);
    }

    #[test]
    fn test_read_input_maps_frames_to_reports() {
        // Arrange
        let stream = vec![
            0x61, 0xE0, // navigator keys, bit 0 down
            tsi::HEADER, tsi::BATTERY_KIND,
        ];
        let channel = answering_channel(stream);
        let mut backend = TsiBackend::new(Box::new(channel), true);
        let mut reports = Vec::new();

        // Act
        let count = backend
            .read_input(Duration::from_millis(2), &mut reports)
            .expect("read succeeds");

        // Assert
        assert_eq!(count, 4);
        assert_eq!(
            reports,
            vec![
                InputReport::KeyBitfield {
                    group: KeyGroup::Navigation,
                    bytes: vec![0x61, 0xE0],
                    descriptors: &tsi::NAVIGATOR_KEYS,
                },
                InputReport::LowBattery,
            ]
        );
    }

    #[test]
    fn test_baud_change_request_is_sent_for_known_speed() {
        // Arrange
        let mut channel = MockStreamChannel::new();
        channel
            .expect_write()
            .withf(|bytes| bytes == [0xFF, 0xFF, 0x05, 0x04])
            .times(1)
            .returning(|_| Ok(()));
        let mut backend = TsiBackend::new(Box::new(channel), true);

        // Act
        let requested = backend.request_link_change(&HIGH_LINK).expect("write succeeds");
        let unknown = backend
            .request_link_change(&NORMAL_LINK.with_baud(38_400))
            .expect("nothing written");

        // Assert
        assert!(requested);
        assert!(!unknown);
    }
}
