//! Stream entry and attachment types
//!
//! This module defines the per-stream state stored in the registry.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

/// Process-unique id of one attachment
pub type AttachmentId = u64;

/// An attached (stream, sink) pair
///
/// The id distinguishes successive attachments of the same pair, so a relay
/// task can tell its own attachment from a newer one made after it was
/// detached.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Attachment {
    pub stream: String,
    pub sink: String,
    pub id: AttachmentId,
}

impl fmt::Display for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} (#{})", self.stream, self.sink, self.id)
    }
}

/// Entry for a single stream in the registry
///
/// Only exists while at least one sink is attached.
#[derive(Debug)]
pub struct StreamEntry {
    /// Attached sinks and the id of each attachment
    pub(super) sinks: HashMap<String, AttachmentId>,

    /// Distinguishes this entry from earlier entries for the same stream
    pub generation: u64,

    /// When the first sink attached
    pub created_at: Instant,
}

impl StreamEntry {
    pub(super) fn new(generation: u64) -> Self {
        Self {
            sinks: HashMap::new(),
            generation,
            created_at: Instant::now(),
        }
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    pub fn contains(&self, sink: &str) -> bool {
        self.sinks.contains_key(sink)
    }

    /// Whether `attachment` is the current attachment for its sink
    pub fn holds(&self, attachment: &Attachment) -> bool {
        self.sinks.get(&attachment.sink) == Some(&attachment.id)
    }

    /// Sorted sink URLs
    pub fn sinks(&self) -> Vec<String> {
        let mut sinks: Vec<String> = self.sinks.keys().cloned().collect();
        sinks.sort();
        sinks
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// Snapshot of one stream's attachments
#[derive(Debug, Clone)]
pub struct StreamStats {
    pub sinks: Vec<String>,
    pub generation: u64,
    pub age: Duration,
}
