//! Device profiles and the cell renderer.

pub mod profile;
pub mod render;
