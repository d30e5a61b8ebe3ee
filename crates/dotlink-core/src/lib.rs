//! # dotlink-core
//!
//! Hardware-independent half of the dotlink braille display driver: frame
//! codecs for the supported wire protocols, immutable device profiles, the
//! cell diffing renderer and the key event pipeline.
//!
//! Nothing in this crate touches a serial port, USB endpoint or HID handle.
//! Every type here operates on byte slices and explicit timestamps, which is
//! what lets the driver crate test its session logic against scripted
//! devices.
//!
//! # Architecture overview (for beginners)
//!
//! A refreshable braille display is a row of cells, each with eight pins
//! that rise and fall to form a braille character.  The host talks to it
//! over a byte stream (serial, USB bulk, Bluetooth) or through HID reports.
//!
//! - **`protocol`** – How bytes are grouped into frames.  A
//!   [`protocol::FrameAssembler`] accumulates incoming bytes and asks a
//!   protocol-specific [`protocol::PacketVerifier`] after each byte whether
//!   the frame is still plausible, complete, or garbage.  The HumanWare and
//!   TSI modules define those verifiers plus the outbound packet builders.
//!
//! - **`domain`** – The [`domain::profile::DeviceProfile`] chosen once per
//!   session after identification, and the [`domain::render::CellRenderer`]
//!   that decides which cells actually need to be transmitted.
//!
//! - **`keys`** – Turns raw key state (bitfields, routing sensor vectors,
//!   discrete press/release messages) into ordered [`keys::KeyEvent`]s and
//!   buffers them in a [`keys::KeyEventQueue`] with optional release
//!   debouncing.

pub mod domain;
pub mod keys;
pub mod protocol;

pub use domain::profile::{DeviceProfile, ProtocolFamily, RoutingLayout, UpdatePolicy};
pub use domain::render::{CellRenderer, RenderError, RenderOutcome};
pub use keys::{KeyEvent, KeyEventQueue, KeyGroup, KeyNormalizer, KeySet};
pub use protocol::{hex_dump, FrameAssembler, PacketVerifier, ProtocolError, Verdict};
