//! Relay task
//!
//! One task per attachment. It reads the stream's feed and pushes muxed
//! fragments to the attached sink:
//!
//! ```text
//!  Initializing ──► AwaitingKeyframe ──► Streaming
//!       │                  │                 │
//!       └──────────────────┴────────┬────────┘
//!                                   ▼
//!                             Terminating ──► Closed
//! ```
//!
//! The liveness timer is armed when the task starts waiting for packets and
//! re-armed on every keyframe. No keyframe within the timeout ends the task,
//! whether or not streaming has begun.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;
use tracing::Instrument;

use super::timeline::TimelineAccumulator;
use crate::error::RelayError;
use crate::media::{CodecData, CodecKind, Packet};
use crate::mux::{Muxer, MuxerFactory};
use crate::registry::{Attachment, ConnectionRegistry};
use crate::source::{MediaSource, Subscription};
use crate::stats::RelayStats;
use crate::transport::{metadata_message, Transport};

/// Lifecycle state of a relay task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Initializing,
    AwaitingKeyframe,
    Streaming,
    Terminating,
    Closed,
}

/// How a relay task ended
#[derive(Debug)]
pub struct TaskOutcome {
    pub reason: RelayError,
    /// State the task was in when it failed
    pub last_state: TaskState,
    /// State after teardown, `Closed` once the attachment is released
    pub state: TaskState,
    pub stats: RelayStats,
}

/// Removes the attachment from the registry however the task exits
struct AttachmentGuard {
    registry: Arc<ConnectionRegistry>,
    attachment: Attachment,
}

impl Drop for AttachmentGuard {
    fn drop(&mut self) {
        self.registry.release(&self.attachment);
    }
}

/// Shared collaborators of every task of a relay
#[derive(Clone)]
pub(crate) struct TaskContext {
    pub(crate) streams: Arc<BTreeSet<String>>,
    pub(crate) registry: Arc<ConnectionRegistry>,
    pub(crate) source: Arc<dyn MediaSource>,
    pub(crate) muxers: Arc<dyn MuxerFactory>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) liveness_timeout: Duration,
}

/// Relays one stream to one sink
pub struct RelayTask {
    attachment: Attachment,
    ctx: TaskContext,
    state: TaskState,
    timeline: TimelineAccumulator,
    stats: RelayStats,
}

impl RelayTask {
    pub(crate) fn new(attachment: Attachment, ctx: TaskContext) -> Self {
        Self {
            attachment,
            ctx,
            state: TaskState::Initializing,
            timeline: TimelineAccumulator::new(),
            stats: RelayStats::new(),
        }
    }

    /// Run until the task terminates
    pub async fn run(mut self) -> TaskOutcome {
        let span = tracing::info_span!(
            "relay",
            stream = %self.attachment.stream,
            sink = %self.attachment.sink,
            attachment = self.attachment.id,
        );

        async move {
            let guard = AttachmentGuard {
                registry: Arc::clone(&self.ctx.registry),
                attachment: self.attachment.clone(),
            };

            tracing::debug!("Relay task started");
            let reason = self.relay().await;
            let last_state = self.state;

            self.state = TaskState::Terminating;
            match &reason {
                RelayError::Detached | RelayError::SourceClosed => {
                    tracing::info!(reason = %reason, "Relay task ending")
                }
                _ => tracing::warn!(reason = %reason, state = ?last_state, "Relay task failed"),
            }

            let stats = self.stats.clone();
            drop(guard);
            if !self.ctx.registry.holds(&self.attachment) {
                self.state = TaskState::Closed;
            }

            tracing::info!(
                state = ?self.state,
                packets = stats.packets_received,
                discarded = stats.packets_discarded,
                keyframes = stats.keyframes,
                fragments = stats.fragments_sent,
                bytes = stats.bytes_sent,
                bitrate = stats.bitrate(),
                elapsed = ?stats.elapsed(),
                "Relay task closed"
            );

            TaskOutcome {
                reason,
                last_state,
                state: self.state,
                stats,
            }
        }
        .instrument(span)
        .await
    }

    /// Drive the state machine until something ends it
    async fn relay(&mut self) -> RelayError {
        let (mut subscription, mut muxer) = match self.initialize().await {
            Ok(parts) => parts,
            Err(e) => return e,
        };

        self.state = TaskState::AwaitingKeyframe;
        let timeout = self.ctx.liveness_timeout;
        let liveness = tokio::time::sleep(timeout);
        tokio::pin!(liveness);

        loop {
            let packet = tokio::select! {
                _ = &mut liveness => return RelayError::LivenessTimeout(timeout),
                packet = subscription.recv() => match packet {
                    Some(packet) => packet,
                    None => return RelayError::SourceClosed,
                },
            };

            if !self.ctx.registry.holds(&self.attachment) {
                return RelayError::Detached;
            }

            self.stats.record_packet(packet.is_keyframe);
            if packet.is_keyframe {
                liveness.as_mut().reset(Instant::now() + timeout);
            }

            if self.state == TaskState::AwaitingKeyframe {
                if !packet.is_keyframe {
                    self.stats.record_discard();
                    continue;
                }
                tracing::info!(
                    skipped = subscription.skipped(),
                    discarded = self.stats.packets_discarded,
                    "First keyframe, streaming"
                );
                self.state = TaskState::Streaming;
            }

            if let Err(e) = self.write(&mut *muxer, packet).await {
                return e;
            }
        }
    }

    async fn initialize(&mut self) -> Result<(Subscription, Box<dyn Muxer>), RelayError> {
        let stream = self.attachment.stream.clone();
        if !self.ctx.streams.contains(&stream) {
            return Err(RelayError::UnknownStream(stream));
        }

        // Subscribe first so a retiring upstream sees this reader
        let subscription = self
            .ctx
            .source
            .subscribe(&stream)
            .ok_or(RelayError::SourceClosed)?;
        self.ctx.source.ensure_running(&stream);

        let codecs = self
            .ctx
            .source
            .codecs(&stream)
            .await
            .ok_or_else(|| RelayError::CodecsUnavailable(stream.clone()))?;
        warn_unsupported_audio(&codecs);

        let mut muxer = self.ctx.muxers.create();
        muxer.initialize(&codecs).map_err(RelayError::MuxerInit)?;

        let init = muxer.init_segment(&codecs);
        tracing::debug!(metadata = %init.metadata, init_bytes = init.data.len(), "Muxer ready");

        self.push(metadata_message(&init.metadata), false).await?;
        self.push(init.data, false).await?;

        Ok((subscription, muxer))
    }

    /// Stamp `packet` with its timeline position, mux it and push any
    /// completed fragment
    async fn write(&mut self, muxer: &mut dyn Muxer, mut packet: Packet) -> Result<(), RelayError> {
        packet.time = self.timeline.advance(packet.track, packet.duration);

        match muxer.write_packet(&packet) {
            Ok(Some(fragment)) => self.push(fragment, true).await,
            Ok(None) => Ok(()),
            Err(e) => {
                self.stats.record_mux_error();
                tracing::warn!(error = %e, track = packet.track, "Packet dropped by muxer");
                Ok(())
            }
        }
    }

    async fn push(&mut self, payload: Bytes, fragment: bool) -> Result<(), RelayError> {
        let len = payload.len();
        self.ctx
            .transport
            .send(&self.attachment.sink, &self.attachment.stream, payload)
            .await?;
        self.stats.record_sent(len, fragment);
        Ok(())
    }
}

fn warn_unsupported_audio(codecs: &[CodecData]) {
    for (track, codec) in codecs.iter().enumerate() {
        if let CodecData::Other {
            kind: CodecKind::Audio,
            name,
        } = codec
        {
            tracing::warn!(track, codec = %name, "Audio codec is not AAC, track will not be relayed");
        }
    }
}
