//! Application layer of the driver.
//!
//! - **`channel`** – The byte-stream and report-based transport traits the
//!   session talks to, the link parameters they can be switched between,
//!   and the connect descriptor types.
//!
//! - **`backends`** – One implementation per protocol family.  A back-end
//!   owns its channel and frame assembler, knows how to identify the
//!   display, and turns inbound frames into [`backends::InputReport`]s.
//!
//! - **`session`** – Negotiation, profile selection, rendering and key
//!   polling on top of a back-end.

pub mod backends;
pub mod channel;
pub mod session;
