//! Minimal-write cell rendering with periodic self-healing.
//!
//! [`CellRenderer`] remembers what was last physically transmitted and
//! works out which cells of a new frame must be sent.  Every
//! `refresh_interval` render calls it forces a full write regardless of
//! the diff, so a display that silently dropped or garbled an update is
//! repaired without anyone noticing.
//!
//! Writes go through a caller-supplied closure.  A failed write leaves the
//! remembered content of that span untouched, so the same cells are diffed
//! and sent again on the next call.

use std::ops::Range;

use thiserror::Error;

use super::profile::UpdatePolicy;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("frame has {actual} cells, display has {expected}")]
    CellCount { expected: usize, actual: usize },
}

/// Result of one render call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    /// Nothing needed to be sent.
    Unchanged,
    /// Cells were transmitted.
    Written {
        writes: usize,
        cells: usize,
        full_refresh: bool,
    },
    /// The display is still inside its post-write quiet time; the frame
    /// will be diffed again on the next call.
    Deferred,
}

/// Spans the next render must transmit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderPlan {
    pub spans: Vec<Range<usize>>,
    /// The spans cover the whole row because a full write was forced.
    pub full_refresh: bool,
}

/// Diffing renderer for one display row.
#[derive(Debug)]
pub struct CellRenderer {
    previous: Vec<u8>,
    /// False until a full frame has been transmitted.
    primed: bool,
    policy: UpdatePolicy,
    refresh_interval: u32,
    countdown: u32,
}

impl CellRenderer {
    /// `refresh_interval` is in render calls; 0 disables forced refreshes.
    pub fn new(cell_count: usize, policy: UpdatePolicy, refresh_interval: u32) -> Self {
        Self {
            previous: vec![0; cell_count],
            primed: false,
            policy,
            refresh_interval,
            countdown: 0,
        }
    }

    pub fn cell_count(&self) -> usize {
        self.previous.len()
    }

    pub fn refresh_interval(&self) -> u32 {
        self.refresh_interval
    }

    /// Content as last transmitted.
    pub fn previous(&self) -> &[u8] {
        &self.previous
    }

    /// Forgets what is on the display so the next render sends everything.
    pub fn invalidate(&mut self) {
        self.primed = false;
    }

    /// Works out what to send for `cells`.  Counts as one render call for
    /// the forced refresh countdown.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::CellCount`] if `cells` is not exactly one row.
    pub fn plan(&mut self, cells: &[u8]) -> Result<RenderPlan, RenderError> {
        let count = self.previous.len();
        if cells.len() != count {
            return Err(RenderError::CellCount {
                expected: count,
                actual: cells.len(),
            });
        }

        if self.refresh_interval > 0 {
            self.countdown = self.countdown.saturating_sub(1);
        }
        let forced = !self.primed || (self.refresh_interval > 0 && self.countdown == 0);

        if count == 0 {
            return Ok(RenderPlan {
                spans: Vec::new(),
                full_refresh: forced,
            });
        }
        if forced {
            return Ok(RenderPlan {
                spans: vec![0..count],
                full_refresh: true,
            });
        }

        let spans = match self.policy {
            UpdatePolicy::WholeFrame => {
                if cells == self.previous.as_slice() {
                    Vec::new()
                } else {
                    vec![0..count]
                }
            }
            UpdatePolicy::ContiguousRange => changed_range(&self.previous, cells).into_iter().collect(),
            UpdatePolicy::MergedSpans { max_gap } => merged_spans(&self.previous, cells, max_gap),
        };

        Ok(RenderPlan {
            spans,
            full_refresh: false,
        })
    }

    /// Records that `span` of `cells` reached the display.
    pub fn commit(&mut self, cells: &[u8], span: Range<usize>, full_refresh: bool) {
        self.previous[span.clone()].copy_from_slice(&cells[span]);
        if full_refresh {
            self.primed = true;
            self.countdown = self.refresh_interval;
        }
    }

    /// Plans, writes and commits in one go.  `write` receives the offset of
    /// the first cell and the cells to send.  Stops at the first failing
    /// write; spans already written stay committed.
    ///
    /// # Errors
    ///
    /// Propagates [`RenderError`] and whatever `write` returns.
    pub fn render<E, W>(&mut self, cells: &[u8], mut write: W) -> Result<RenderOutcome, E>
    where
        E: From<RenderError>,
        W: FnMut(usize, &[u8]) -> Result<(), E>,
    {
        let plan = self.plan(cells)?;
        if plan.spans.is_empty() {
            if plan.full_refresh {
                self.commit(cells, 0..0, true);
            }
            return Ok(RenderOutcome::Unchanged);
        }

        let mut sent = 0;
        for span in &plan.spans {
            write(span.start, &cells[span.clone()])?;
            self.commit(cells, span.clone(), plan.full_refresh);
            sent += span.len();
        }

        Ok(RenderOutcome::Written {
            writes: plan.spans.len(),
            cells: sent,
            full_refresh: plan.full_refresh,
        })
    }
}

/// First through last differing cell, scanning inward from both ends.
fn changed_range(previous: &[u8], cells: &[u8]) -> Option<Range<usize>> {
    let start = previous.iter().zip(cells).position(|(a, b)| a != b)?;
    let end = previous
        .iter()
        .zip(cells)
        .rposition(|(a, b)| a != b)
        .map_or(start + 1, |last| last + 1);
    Some(start..end)
}

fn merged_spans(previous: &[u8], cells: &[u8], max_gap: usize) -> Vec<Range<usize>> {
    let mut spans: Vec<Range<usize>> = Vec::new();

    for (i, _) in previous.iter().zip(cells).enumerate().filter(|(_, (a, b))| a != b) {
        match spans.last_mut() {
            Some(span) if i - span.end <= max_gap => span.end = i + 1,
            _ => spans.push(i..i + 1),
        }
    }

    spans
}
