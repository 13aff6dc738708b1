//! Per-track presentation timeline

use std::collections::HashMap;
use std::time::Duration;

/// Running sum of packet durations per track
///
/// The sum only grows. Source timestamps are ignored entirely, so a jump or
/// reset in the upstream clock never shows up in the relayed timeline.
#[derive(Debug, Default)]
pub struct TimelineAccumulator {
    tracks: HashMap<usize, Duration>,
}

impl TimelineAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `duration` to `track` and return the new total
    pub fn advance(&mut self, track: usize, duration: Duration) -> Duration {
        let total = self.tracks.entry(track).or_default();
        *total += duration;
        *total
    }

    /// Current total of `track`
    pub fn position(&self, track: usize) -> Duration {
        self.tracks.get(&track).copied().unwrap_or_default()
    }
}
