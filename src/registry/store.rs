//! Connection registry implementation
//!
//! The table of which sinks are attached to which stream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::entry::{Attachment, StreamEntry, StreamStats};

/// Result of [`ConnectionRegistry::attach`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachOutcome {
    /// A new attachment was created
    Attached {
        attachment: Attachment,
        /// The stream had no sinks before this one
        first_sink: bool,
    },
    /// The pair was already attached; nothing changed
    AlreadyAttached,
}

/// Result of [`ConnectionRegistry::detach`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetachOutcome {
    Detached {
        /// The removed sink was the last one, so the stream entry is gone
        stream_closed: bool,
    },
    NotAttached,
}

/// Process-wide table of stream attachments
///
/// A single mutex guards the table. It is never held across an await point,
/// so a blocking lock is fine.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    streams: Mutex<HashMap<String, StreamEntry>>,
    next_attachment: AtomicU64,
    next_generation: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `sink` to `stream`
    ///
    /// Idempotent: a second attach of the same pair is reported as
    /// [`AttachOutcome::AlreadyAttached`].
    pub fn attach(&self, stream: &str, sink: &str) -> AttachOutcome {
        let mut streams = self.streams.lock();

        let entry = streams.entry(stream.to_string()).or_insert_with(|| {
            let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
            StreamEntry::new(generation)
        });

        if entry.contains(sink) {
            tracing::debug!(stream = %stream, sink = %sink, "Sink already attached");
            return AttachOutcome::AlreadyAttached;
        }

        let first_sink = entry.sink_count() == 0;
        let id = self.next_attachment.fetch_add(1, Ordering::Relaxed) + 1;
        entry.sinks.insert(sink.to_string(), id);

        tracing::info!(
            stream = %stream,
            sink = %sink,
            attachment = id,
            sinks = entry.sink_count(),
            generation = entry.generation,
            "Sink attached"
        );

        AttachOutcome::Attached {
            attachment: Attachment {
                stream: stream.to_string(),
                sink: sink.to_string(),
                id,
            },
            first_sink,
        }
    }

    /// Detach `sink` from `stream`
    ///
    /// Removes the stream entry when its last sink goes. Detaching an absent
    /// pair is a no-op.
    pub fn detach(&self, stream: &str, sink: &str) -> DetachOutcome {
        let mut streams = self.streams.lock();
        Self::remove_locked(&mut streams, stream, sink, None)
    }

    /// Whether `sink` is attached to `stream`
    pub fn is_attached(&self, stream: &str, sink: &str) -> bool {
        self.streams
            .lock()
            .get(stream)
            .is_some_and(|entry| entry.contains(sink))
    }

    /// Whether `attachment` is still the live attachment for its pair
    pub fn holds(&self, attachment: &Attachment) -> bool {
        self.streams
            .lock()
            .get(&attachment.stream)
            .is_some_and(|entry| entry.holds(attachment))
    }

    /// Remove `attachment` if it is still the live attachment for its pair
    ///
    /// A newer attachment of the same pair is left alone.
    pub fn release(&self, attachment: &Attachment) -> DetachOutcome {
        let mut streams = self.streams.lock();
        Self::remove_locked(
            &mut streams,
            &attachment.stream,
            &attachment.sink,
            Some(attachment.id),
        )
    }

    fn remove_locked(
        streams: &mut HashMap<String, StreamEntry>,
        stream: &str,
        sink: &str,
        id: Option<u64>,
    ) -> DetachOutcome {
        let Some(entry) = streams.get_mut(stream) else {
            return DetachOutcome::NotAttached;
        };

        match (entry.sinks.get(sink), id) {
            (None, _) => return DetachOutcome::NotAttached,
            (Some(current), Some(id)) if *current != id => return DetachOutcome::NotAttached,
            _ => {}
        }

        entry.sinks.remove(sink);
        let remaining = entry.sink_count();
        tracing::info!(
            stream = %stream,
            sink = %sink,
            sinks = remaining,
            "Sink detached"
        );

        let stream_closed = remaining == 0;
        if stream_closed {
            streams.remove(stream);
            tracing::info!(stream = %stream, "Stream has no sinks left");
        }

        DetachOutcome::Detached { stream_closed }
    }

    /// Sorted sinks attached to `stream`
    pub fn sinks(&self, stream: &str) -> Vec<String> {
        self.streams
            .lock()
            .get(stream)
            .map(StreamEntry::sinks)
            .unwrap_or_default()
    }

    /// Number of streams with at least one sink
    pub fn stream_count(&self) -> usize {
        self.streams.lock().len()
    }

    /// Generation of the current entry for `stream`
    pub fn generation(&self, stream: &str) -> Option<u64> {
        self.streams.lock().get(stream).map(|entry| entry.generation)
    }

    pub fn stream_stats(&self, stream: &str) -> Option<StreamStats> {
        self.streams.lock().get(stream).map(|entry| StreamStats {
            sinks: entry.sinks(),
            generation: entry.generation,
            age: entry.age(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attached(outcome: AttachOutcome) -> (Attachment, bool) {
        match outcome {
            AttachOutcome::Attached {
                attachment,
                first_sink,
            } => (attachment, first_sink),
            AttachOutcome::AlreadyAttached => panic!("expected a new attachment"),
        }
    }

    #[test]
    fn test_attach_is_idempotent() {
        let registry = ConnectionRegistry::new();

        let (attachment, first_sink) = attached(registry.attach("cam1", "http://sink-a"));
        assert!(first_sink);
        assert_eq!(attachment.stream, "cam1");
        assert_eq!(attachment.sink, "http://sink-a");

        assert_eq!(
            registry.attach("cam1", "http://sink-a"),
            AttachOutcome::AlreadyAttached
        );
        assert_eq!(registry.sinks("cam1"), vec!["http://sink-a"]);
        assert_eq!(registry.stream_count(), 1);
    }

    #[test]
    fn test_second_sink_is_not_first() {
        let registry = ConnectionRegistry::new();
        attached(registry.attach("cam1", "http://sink-b"));
        let (_, first_sink) = attached(registry.attach("cam1", "http://sink-a"));
        assert!(!first_sink);

        // Sorted regardless of attach order
        assert_eq!(registry.sinks("cam1"), vec!["http://sink-a", "http://sink-b"]);
    }

    #[test]
    fn test_detach() {
        let registry = ConnectionRegistry::new();
        attached(registry.attach("cam1", "http://sink-a"));
        attached(registry.attach("cam1", "http://sink-b"));

        assert_eq!(
            registry.detach("cam1", "http://sink-a"),
            DetachOutcome::Detached {
                stream_closed: false
            }
        );
        assert!(!registry.is_attached("cam1", "http://sink-a"));
        assert_eq!(registry.sinks("cam1"), vec!["http://sink-b"]);

        assert_eq!(
            registry.detach("cam1", "http://sink-b"),
            DetachOutcome::Detached {
                stream_closed: true
            }
        );
        assert_eq!(registry.stream_count(), 0);
        assert!(registry.generation("cam1").is_none());
    }

    #[test]
    fn test_detach_absent_is_noop() {
        let registry = ConnectionRegistry::new();
        assert_eq!(
            registry.detach("cam1", "http://sink-a"),
            DetachOutcome::NotAttached
        );

        attached(registry.attach("cam1", "http://sink-a"));
        assert_eq!(
            registry.detach("cam1", "http://sink-z"),
            DetachOutcome::NotAttached
        );
        assert_eq!(registry.sinks("cam1"), vec!["http://sink-a"]);
    }

    #[test]
    fn test_reattach_creates_new_generation() {
        let registry = ConnectionRegistry::new();
        attached(registry.attach("cam1", "http://sink-a"));
        let first = registry.generation("cam1").unwrap();

        registry.detach("cam1", "http://sink-a");
        let (_, first_sink) = attached(registry.attach("cam1", "http://sink-a"));
        assert!(first_sink);
        assert!(registry.generation("cam1").unwrap() > first);
    }

    #[test]
    fn test_stale_release_keeps_newer_attachment() {
        let registry = ConnectionRegistry::new();
        let (old, _) = attached(registry.attach("cam1", "http://sink-a"));
        registry.detach("cam1", "http://sink-a");
        let (new, _) = attached(registry.attach("cam1", "http://sink-a"));

        assert_ne!(old.id, new.id);
        assert!(!registry.holds(&old));
        assert!(registry.holds(&new));

        assert_eq!(registry.release(&old), DetachOutcome::NotAttached);
        assert!(registry.is_attached("cam1", "http://sink-a"));

        assert_eq!(
            registry.release(&new),
            DetachOutcome::Detached {
                stream_closed: true
            }
        );
        // Releasing twice is harmless
        assert_eq!(registry.release(&new), DetachOutcome::NotAttached);
    }

    #[test]
    fn test_stream_stats() {
        let registry = ConnectionRegistry::new();
        assert!(registry.stream_stats("cam1").is_none());

        attached(registry.attach("cam1", "http://sink-a"));
        let stats = registry.stream_stats("cam1").unwrap();
        assert_eq!(stats.sinks, vec!["http://sink-a"]);
        assert_eq!(Some(stats.generation), registry.generation("cam1"));
    }
}
