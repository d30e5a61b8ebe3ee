//! # dotlink-driver
//!
//! Connects to a braille display and keeps it in sync: opens the transport,
//! negotiates link parameters, identifies the model, and then exposes a
//! [`DeviceSession`] with `probe`, `render`, `poll_events` and
//! `disconnect`.
//!
//! # Layers (for beginners)
//!
//! - **`application`** – Transport traits ([`application::channel`]), one
//!   protocol back-end per display family, and the session itself.  Nothing
//!   here knows about serial ports or USB; it talks to `dyn StreamChannel`
//!   and `dyn ReportChannel`.
//! - **`infrastructure`** – The real transports (serialport, nusb, hidapi),
//!   an in-memory scripted display for tests, and TOML configuration.
//!
//! The `dotlinkd` binary wires the two together in a fixed-interval tick
//! loop.

/// Application layer: channel traits, protocol back-ends and the session.
pub mod application;

/// Infrastructure layer: OS transports, test doubles and configuration.
pub mod infrastructure;

pub use application::channel::{
    Channel, ConnectCandidate, Connector, LinkParameters, LinkSpec, Parity, TransportError,
};
pub use application::session::{Capabilities, DeviceSession, SessionError, SessionId, SessionOptions};
