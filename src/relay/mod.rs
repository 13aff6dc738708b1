//! Relay service
//!
//! Validates stream ids, updates the [`ConnectionRegistry`] and spawns one
//! [`RelayTask`] per new attachment. Cloning a [`Relay`] is cheap; all
//! clones share the same registry.

pub mod task;
pub mod timeline;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::{RelayError, Result};
use crate::mux::{FlvMuxerFactory, MuxerFactory};
use crate::registry::{AttachOutcome, Attachment, ConnectionRegistry, DetachOutcome};
use crate::source::{MediaSource, SourceHub};
use crate::transport::{HttpTransport, Transport};

pub use task::{RelayTask, TaskOutcome, TaskState};
pub use timeline::TimelineAccumulator;

use task::TaskContext;

/// Default keyframe liveness timeout
pub const DEFAULT_LIVENESS_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of [`Relay::attach`]
#[derive(Debug)]
pub enum Attach {
    /// A relay task was started for the new attachment
    Started(RelayHandle),
    /// The sink was already attached; nothing changed
    AlreadyAttached,
}

/// Handle to a spawned relay task
#[derive(Debug)]
pub struct RelayHandle {
    pub attachment: Attachment,
    handle: JoinHandle<TaskOutcome>,
}

impl RelayHandle {
    /// Wait for the task to end. `None` if it panicked.
    pub async fn join(self) -> Option<TaskOutcome> {
        self.handle.await.ok()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Relays configured streams to attached sinks
#[derive(Clone)]
pub struct Relay {
    ctx: TaskContext,
}

impl Relay {
    pub fn new(
        streams: impl IntoIterator<Item = String>,
        source: Arc<dyn MediaSource>,
        muxers: Arc<dyn MuxerFactory>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            ctx: TaskContext {
                streams: Arc::new(streams.into_iter().collect()),
                registry: Arc::new(ConnectionRegistry::new()),
                source,
                muxers,
                transport,
                liveness_timeout: DEFAULT_LIVENESS_TIMEOUT,
            },
        }
    }

    /// Set how long a task may go without a keyframe
    pub fn liveness_timeout(mut self, timeout: Duration) -> Self {
        self.ctx.liveness_timeout = timeout;
        self
    }

    /// Build a relay from configuration with the HTTP-FLV source hub, FLV
    /// muxer and HTTP transport
    ///
    /// The hub is returned as well so callers can feed local streams.
    pub fn from_config(config: &Config) -> Result<(Self, Arc<SourceHub>)> {
        let hub = Arc::new(SourceHub::new(config)?);
        let transport = HttpTransport::new(config.relay.push_timeout())?;

        let relay = Self::new(
            config.stream_ids(),
            Arc::clone(&hub) as Arc<dyn MediaSource>,
            Arc::new(FlvMuxerFactory::default()),
            Arc::new(transport),
        )
        .liveness_timeout(config.relay.liveness_timeout());

        Ok((relay, hub))
    }

    /// Attach `sink` to `stream` and start relaying to it
    ///
    /// Starts the source when this is the stream's first sink. Attaching a
    /// pair that is already attached changes nothing.
    pub fn attach(&self, stream: &str, sink: &str) -> std::result::Result<Attach, RelayError> {
        if !self.stream_exists(stream) {
            return Err(RelayError::UnknownStream(stream.to_string()));
        }

        match self.ctx.registry.attach(stream, sink) {
            AttachOutcome::AlreadyAttached => Ok(Attach::AlreadyAttached),
            AttachOutcome::Attached {
                attachment,
                first_sink,
            } => {
                if first_sink {
                    self.ctx.source.ensure_running(stream);
                }
                Ok(Attach::Started(self.spawn(attachment)))
            }
        }
    }

    /// Detach `sink` from `stream`
    ///
    /// The relay task notices on its next packet, or at the latest when its
    /// liveness timer fires.
    pub fn detach(&self, stream: &str, sink: &str) -> std::result::Result<DetachOutcome, RelayError> {
        if !self.stream_exists(stream) {
            return Err(RelayError::UnknownStream(stream.to_string()));
        }
        Ok(self.ctx.registry.detach(stream, sink))
    }

    pub fn is_attached(&self, stream: &str, sink: &str) -> bool {
        self.ctx.registry.is_attached(stream, sink)
    }

    pub fn stream_exists(&self, stream: &str) -> bool {
        self.ctx.streams.contains(stream)
    }

    /// Sorted ids of configured streams
    pub fn stream_names(&self) -> Vec<String> {
        self.ctx.streams.iter().cloned().collect()
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.ctx.registry
    }

    fn spawn(&self, attachment: Attachment) -> RelayHandle {
        let task = RelayTask::new(attachment.clone(), self.ctx.clone());
        RelayHandle {
            attachment,
            handle: tokio::spawn(task.run()),
        }
    }
}
