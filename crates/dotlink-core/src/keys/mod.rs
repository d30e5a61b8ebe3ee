//! Key event pipeline: raw key state in, ordered press/release events out.

pub mod bitfield;
pub mod keyset;
pub mod normalizer;
pub mod queue;

use std::fmt;

pub use keyset::KeySet;
pub use normalizer::KeyNormalizer;
pub use queue::KeyEventQueue;

/// The two key groups every supported display reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyGroup {
    /// Front panel, thumb and braille keys.
    Navigation,
    /// One sensor per braille cell.
    Routing,
}

impl fmt::Display for KeyGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyGroup::Navigation => f.write_str("navigation"),
            KeyGroup::Routing => f.write_str("routing"),
        }
    }
}

/// A single normalised key transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyEvent {
    pub group: KeyGroup,
    pub key: u8,
    pub press: bool,
}

impl KeyEvent {
    pub fn press(group: KeyGroup, key: u8) -> Self {
        Self { group, key, press: true }
    }

    pub fn release(group: KeyGroup, key: u8) -> Self {
        Self { group, key, press: false }
    }

    /// True when both events refer to the same physical key.
    pub fn same_key(&self, other: &KeyEvent) -> bool {
        self.group == other.group && self.key == other.key
    }
}

impl fmt::Display for KeyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let action = if self.press { "press" } else { "release" };
        write!(f, "{action} {} key {}", self.group, self.key)
    }
}
