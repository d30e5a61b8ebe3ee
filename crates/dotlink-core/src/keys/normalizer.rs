//! Turns device key state into ordered press/release events.
//!
//! Displays report keys in three ways:
//!
//! - a full bitfield of every held navigation key (TSI key frames),
//! - a bit vector of routing sensors (TSI routing frames),
//! - discrete down/up messages per key (HumanWare).
//!
//! The first two are snapshots.  [`KeyNormalizer::update`] diffs each
//! snapshot against the held state of its group: releases are emitted
//! first in ascending key order, then presses, most recently scanned
//! first.  A consumer therefore never sees an old key and its replacement
//! held at the same time.

use tracing::warn;

use super::bitfield::{self, KeyByteDescriptor};
use super::{KeyEvent, KeyGroup, KeySet};
use crate::domain::profile::{CapabilityError, RoutingLayout};
use crate::protocol::ProtocolError;

/// Held key state per group.
#[derive(Debug, Default)]
pub struct KeyNormalizer {
    navigation: KeySet,
    routing: KeySet,
}

impl KeyNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys currently held in `group`.
    pub fn held(&self, group: KeyGroup) -> &KeySet {
        match group {
            KeyGroup::Navigation => &self.navigation,
            KeyGroup::Routing => &self.routing,
        }
    }

    fn held_mut(&mut self, group: KeyGroup) -> &mut KeySet {
        match group {
            KeyGroup::Navigation => &mut self.navigation,
            KeyGroup::Routing => &mut self.routing,
        }
    }

    /// Replaces the held state of `group` with `new`, returning the events
    /// that describe the change.
    pub fn update(&mut self, group: KeyGroup, new: &KeySet) -> Vec<KeyEvent> {
        let old = self.held_mut(group);
        let mut positions: Vec<usize> = old.iter().chain(new.iter()).collect();
        positions.sort_unstable();
        positions.dedup();

        let mut events = Vec::new();
        let mut pressed = Vec::new();

        for key in positions {
            match (new.contains(key), old.contains(key)) {
                (true, false) => {
                    old.insert(key);
                    pressed.push(key);
                }
                (false, true) => {
                    old.remove(key);
                    if let Some(event) = make_event(group, key, false) {
                        events.push(event);
                    }
                }
                _ => {}
            }
        }

        events.extend(pressed.into_iter().rev().filter_map(|key| make_event(group, key, true)));
        events
    }

    /// Decodes a signature-tagged key frame and applies it to `group`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnexpectedFrame`] if any byte fails its
    /// signature check; held state is left untouched.
    pub fn apply_bitfield(
        &mut self,
        group: KeyGroup,
        bytes: &[u8],
        descriptors: &[KeyByteDescriptor],
    ) -> Result<Vec<KeyEvent>, ProtocolError> {
        if bitfield::signature_mismatch(bytes, descriptors).is_some() {
            return Err(ProtocolError::UnexpectedFrame(bytes.to_vec()));
        }
        let new = bitfield::accumulate(bytes, descriptors);
        Ok(self.update(group, &new))
    }

    /// Applies a routing sensor vector.  `declared` is the byte count the
    /// frame announced and `sensors` its payload.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::RoutingCountMismatch`] when `declared`
    /// differs from what the model produces; the frame is ignored.
    pub fn apply_routing(
        &mut self,
        layout: &RoutingLayout,
        declared: usize,
        sensors: &[u8],
    ) -> Result<Vec<KeyEvent>, CapabilityError> {
        let expected = layout.frame_bytes as usize;
        if declared != expected || sensors.len() != expected {
            return Err(CapabilityError::RoutingCountMismatch { declared, expected });
        }

        let horizontal = &sensors[layout.skipped_bytes as usize..];
        let new = KeySet::from_bit_vector(horizontal, layout.keys as usize);
        Ok(self.update(KeyGroup::Routing, &new))
    }

    /// Records a discrete key transition and passes it through unchanged.
    pub fn apply_change(&mut self, group: KeyGroup, key: u8, press: bool) -> KeyEvent {
        let held = self.held_mut(group);
        if press {
            held.insert(key as usize);
        } else {
            held.remove(key as usize);
        }
        KeyEvent { group, key, press }
    }

    /// Forgets all held keys without emitting events.
    pub fn reset(&mut self) {
        self.navigation.clear();
        self.routing.clear();
    }
}

fn make_event(group: KeyGroup, key: usize, press: bool) -> Option<KeyEvent> {
    match u8::try_from(key) {
        Ok(key) => Some(KeyEvent { group, key, press }),
        Err(_) => {
            warn!(%group, key, "key index out of range, dropped");
            None
        }
    }
}
