//! Infrastructure layer for the driver.
//!
//! Contains OS-facing adapters: serial, USB and HID transports, a scripted
//! in-memory display for tests, and configuration file storage.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `dotlink_core`, but MUST NOT be imported by the `application` layer.

pub mod storage;
pub mod transport;
