//! Upstream media sources
//!
//! Relay tasks see a source only through [`MediaSource`]: start it, ask for
//! the codec set, subscribe to the packet feed. Every subscriber of a stream
//! reads the same feed, a `tokio::sync::broadcast` channel, so packets are
//! fanned out rather than consumed:
//!
//! ```text
//!   upstream ──► ingest worker ──► Feed (broadcast::Sender<Packet>)
//!                                    │
//!                  ┌─────────────────┼─────────────────┐
//!                  ▼                 ▼                 ▼
//!             Subscription      Subscription      Subscription
//!             (RelayTask)       (RelayTask)       (RelayTask)
//! ```
//!
//! `Packet` payloads are `Bytes`, so a clone per subscriber only bumps a
//! reference count.

pub mod hub;
pub mod ingest;

use async_trait::async_trait;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::media::{CodecData, Packet};

pub use hub::SourceHub;
pub use ingest::{Built, PacketBuilder};

/// A live source of packets for a set of streams
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Start pulling `stream` if nothing is pulling it yet
    fn ensure_running(&self, stream: &str);

    /// Codec set of `stream`, or `None` if it did not become known in time
    async fn codecs(&self, stream: &str) -> Option<Vec<CodecData>>;

    /// Subscribe to the packet feed of `stream`
    ///
    /// Dropping the returned handle unsubscribes.
    fn subscribe(&self, stream: &str) -> Option<Subscription>;
}

/// A reader of one stream's packet feed
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<Packet>,
    skipped: u64,
}

impl Subscription {
    pub fn new(rx: broadcast::Receiver<Packet>) -> Self {
        Self { rx, skipped: 0 }
    }

    /// Next packet, or `None` once the feed is closed
    ///
    /// A reader that falls behind loses the oldest packets; the loss is
    /// logged and reading continues from the oldest packet still buffered.
    pub async fn recv(&mut self) -> Option<Packet> {
        loop {
            match self.rx.recv().await {
                Ok(packet) => return Some(packet),
                Err(RecvError::Lagged(n)) => {
                    self.skipped += n;
                    tracing::warn!(skipped = n, "Subscriber lagging, packets dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Packets lost to lagging so far
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}
