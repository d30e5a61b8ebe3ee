//! FIFO of normalised key events with optional release debouncing.
//!
//! # Debouncing (for beginners)
//!
//! Worn key contacts sometimes bounce: a key that is held down reports a
//! release immediately followed by another press.  With a non-zero
//! release timeout, a release is parked as the single *pending* event
//! instead of being queued.  If the same key is pressed again before the
//! deadline, the pair cancels out and the consumer sees one continuous
//! hold.  Any other event, or the deadline passing on a later
//! [`KeyEventQueue::tick`], flushes the parked release into the queue.
//!
//! Time is always passed in explicitly so the queue stays deterministic in
//! tests.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::trace;

use super::{KeyEvent, KeyGroup};

#[derive(Debug, Clone, Copy)]
struct PendingRelease {
    event: KeyEvent,
    deadline: Instant,
}

/// Buffered key events awaiting the consumer.
#[derive(Debug)]
pub struct KeyEventQueue {
    events: VecDeque<KeyEvent>,
    pending: Option<PendingRelease>,
    release_timeout: Duration,
}

impl KeyEventQueue {
    /// A zero `release_timeout` disables debouncing.
    pub fn new(release_timeout: Duration) -> Self {
        Self {
            events: VecDeque::new(),
            pending: None,
            release_timeout,
        }
    }

    pub fn release_timeout(&self) -> Duration {
        self.release_timeout
    }

    /// Queues `event`, dispatching on its direction.
    pub fn enqueue(&mut self, event: KeyEvent, now: Instant) {
        if event.press {
            self.enqueue_press(event.group, event.key, now);
        } else {
            self.enqueue_release(event.group, event.key, now);
        }
    }

    pub fn enqueue_press(&mut self, group: KeyGroup, key: u8, now: Instant) {
        let event = KeyEvent::press(group, key);

        if let Some(pending) = self.pending {
            if pending.event.same_key(&event) && now < pending.deadline {
                trace!(%group, key, "release bounce absorbed");
                self.pending = None;
                return;
            }
            self.flush_pending();
        }

        self.events.push_back(event);
    }

    pub fn enqueue_release(&mut self, group: KeyGroup, key: u8, now: Instant) {
        let event = KeyEvent::release(group, key);
        self.flush_pending();

        if self.release_timeout.is_zero() {
            self.events.push_back(event);
        } else {
            self.pending = Some(PendingRelease {
                event,
                deadline: now + self.release_timeout,
            });
        }
    }

    /// Flushes the pending release once its deadline has passed.
    pub fn tick(&mut self, now: Instant) {
        if self.pending.is_some_and(|p| now >= p.deadline) {
            self.flush_pending();
        }
    }

    /// Oldest queued event.  Does not look at the pending release; call
    /// [`tick`](Self::tick) first.
    pub fn dequeue(&mut self) -> Option<KeyEvent> {
        self.events.pop_front()
    }

    /// Ticks, then takes every queued event in order.
    pub fn drain(&mut self, now: Instant) -> Vec<KeyEvent> {
        self.tick(now);
        self.events.drain(..).collect()
    }

    /// Throws away queued events and the pending release.
    pub fn clear(&mut self) {
        self.events.clear();
        self.pending = None;
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    fn flush_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            self.events.push_back(pending.event);
        }
    }
}
