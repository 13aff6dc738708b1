//! Source hub
//!
//! Owns one [`Feed`] per active stream. Streams configured with an upstream
//! URL are pulled by an ingest worker; any stream can also be fed directly
//! with [`SourceHub::publish`] and [`SourceHub::set_codecs`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};

use super::ingest::IngestWorker;
use super::{MediaSource, Subscription};
use crate::config::{Config, SourceConfig};
use crate::media::{CodecData, Packet};

/// Feeds by stream id, shared with the ingest workers
pub(crate) type FeedMap = Arc<Mutex<HashMap<String, Arc<Feed>>>>;

/// The shared packet feed of one stream
///
/// Dropping the last reference closes the feed for every subscriber.
#[derive(Debug)]
pub struct Feed {
    packets: broadcast::Sender<Packet>,
    codecs: watch::Sender<Option<Vec<CodecData>>>,
    /// Set while an ingest worker owns this feed
    pulling: AtomicBool,
}

impl Feed {
    fn new(capacity: usize) -> Self {
        let (packets, _) = broadcast::channel(capacity.max(1));
        let (codecs, _) = watch::channel(None);
        Self {
            packets,
            codecs,
            pulling: AtomicBool::new(false),
        }
    }

    /// Send a packet to every subscriber, returning how many received it
    pub fn publish(&self, packet: Packet) -> usize {
        // An error only means nobody is subscribed right now
        self.packets.send(packet).unwrap_or(0)
    }

    pub fn set_codecs(&self, codecs: Vec<CodecData>) {
        self.codecs.send_replace(Some(codecs));
    }

    pub fn subscriber_count(&self) -> usize {
        self.packets.receiver_count()
    }

    fn subscribe(&self) -> Subscription {
        Subscription::new(self.packets.subscribe())
    }
}

/// [`MediaSource`] over in-process feeds and HTTP-FLV upstreams
#[derive(Debug)]
pub struct SourceHub {
    feeds: FeedMap,
    /// Upstream URL per stream id
    upstreams: HashMap<String, String>,
    config: SourceConfig,
    client: reqwest::Client,
}

impl SourceHub {
    /// Create a hub pulling the upstreams listed in `config`
    pub fn new(config: &Config) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self::with_client(config, client))
    }

    pub fn with_client(config: &Config, client: reqwest::Client) -> Self {
        let upstreams = config
            .streams
            .iter()
            .filter(|(_, stream)| !stream.url.is_empty())
            .map(|(id, stream)| (id.clone(), stream.url.clone()))
            .collect();

        Self {
            feeds: Arc::new(Mutex::new(HashMap::new())),
            upstreams,
            config: config.source.clone(),
            client,
        }
    }

    /// Feed for `stream`, created on first use
    pub fn feed(&self, stream: &str) -> Arc<Feed> {
        let mut feeds = self.feeds.lock();
        let feed = feeds
            .entry(stream.to_string())
            .or_insert_with(|| Arc::new(Feed::new(self.config.feed_capacity)));
        Arc::clone(feed)
    }

    /// Publish a packet on `stream`
    pub fn publish(&self, stream: &str, packet: Packet) -> usize {
        self.feed(stream).publish(packet)
    }

    /// Set the codec set of `stream`
    pub fn set_codecs(&self, stream: &str, codecs: Vec<CodecData>) {
        tracing::debug!(stream = %stream, tracks = codecs.len(), "Codecs set");
        self.feed(stream).set_codecs(codecs);
    }

    /// Remove the feed of `stream`, closing it for all subscribers
    pub fn close(&self, stream: &str) {
        if self.feeds.lock().remove(stream).is_some() {
            tracing::info!(stream = %stream, "Feed closed");
        }
    }

    /// Whether an ingest worker is pulling `stream`
    pub fn is_pulling(&self, stream: &str) -> bool {
        self.feeds
            .lock()
            .get(stream)
            .is_some_and(|feed| feed.pulling.load(Ordering::Acquire))
    }

    pub fn subscriber_count(&self, stream: &str) -> usize {
        self.feeds
            .lock()
            .get(stream)
            .map_or(0, |feed| feed.subscriber_count())
    }
}

#[async_trait]
impl MediaSource for SourceHub {
    fn ensure_running(&self, stream: &str) {
        let Some(url) = self.upstreams.get(stream) else {
            tracing::debug!(stream = %stream, "No upstream configured, feed is local");
            return;
        };

        let feed = self.feed(stream);
        if feed.pulling.swap(true, Ordering::AcqRel) {
            return;
        }

        tracing::info!(stream = %stream, url = %url, "Starting upstream pull");
        let worker = IngestWorker {
            stream: stream.to_string(),
            url: url.clone(),
            client: self.client.clone(),
            feed,
            feeds: Arc::clone(&self.feeds),
            config: self.config.clone(),
        };
        tokio::spawn(worker.run());
    }

    async fn codecs(&self, stream: &str) -> Option<Vec<CodecData>> {
        let mut rx = self.feed(stream).codecs.subscribe();
        let wait = self.config.codec_wait();

        let codecs = match tokio::time::timeout(wait, rx.wait_for(Option::is_some)).await {
            Ok(Ok(codecs)) => codecs.clone(),
            Ok(Err(_)) => {
                tracing::debug!(stream = %stream, "Feed closed before codecs were known");
                None
            }
            Err(_) => {
                tracing::debug!(stream = %stream, wait = ?wait, "Timed out waiting for codecs");
                None
            }
        };
        codecs
    }

    fn subscribe(&self, stream: &str) -> Option<Subscription> {
        // Under the map lock, so a worker retiring the feed counts this reader
        let mut feeds = self.feeds.lock();
        let feed = feeds
            .entry(stream.to_string())
            .or_insert_with(|| Arc::new(Feed::new(self.config.feed_capacity)));
        Some(feed.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::media::CodecKind;

    fn hub() -> SourceHub {
        let config = Config::default()
            .local_stream("cam1")
            .codec_wait(Duration::from_secs(1));
        SourceHub::with_client(&config, reqwest::Client::new())
    }

    fn codec() -> CodecData {
        CodecData::Other {
            kind: CodecKind::Video,
            name: "test".into(),
        }
    }

    #[tokio::test]
    async fn test_publish_fans_out() {
        let hub = hub();
        let mut a = hub.subscribe("cam1").unwrap();
        let mut b = hub.subscribe("cam1").unwrap();
        assert_eq!(hub.subscriber_count("cam1"), 2);

        let packet = Packet::video(0, true, Duration::from_millis(40), Bytes::from_static(b"k"));
        assert_eq!(hub.publish("cam1", packet), 2);

        assert!(a.recv().await.unwrap().is_keyframe);
        assert!(b.recv().await.unwrap().is_keyframe);

        drop(a);
        assert_eq!(hub.subscriber_count("cam1"), 1);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let hub = hub();
        let packet = Packet::audio(0, Duration::from_millis(20), Bytes::new());
        assert_eq!(hub.publish("cam1", packet), 0);
    }

    #[tokio::test]
    async fn test_codecs_wait_for_producer() {
        let hub = Arc::new(hub());

        let waiter = {
            let hub = Arc::clone(&hub);
            tokio::spawn(async move { hub.codecs("cam1").await })
        };
        tokio::task::yield_now().await;
        hub.set_codecs("cam1", vec![codec()]);

        let codecs = waiter.await.unwrap().unwrap();
        assert_eq!(codecs.len(), 1);
        assert_eq!(codecs[0].codec_string(), "test");
    }

    #[tokio::test(start_paused = true)]
    async fn test_codecs_timeout() {
        let hub = hub();
        assert!(hub.codecs("cam1").await.is_none());
    }

    #[tokio::test]
    async fn test_close_ends_subscriptions() {
        let hub = hub();
        let mut sub = hub.subscribe("cam1").unwrap();
        hub.close("cam1");
        assert!(sub.recv().await.is_none());
    }

    #[test]
    fn test_idle_retire_respects_new_reader() {
        let hub = hub();
        let worker = IngestWorker {
            stream: "cam1".into(),
            url: "http://upstream.invalid/cam1.flv".into(),
            client: hub.client.clone(),
            feed: hub.feed("cam1"),
            feeds: Arc::clone(&hub.feeds),
            config: hub.config.clone(),
        };

        // A reader that subscribed before retirement keeps the feed
        let sub = hub.subscribe("cam1").unwrap();
        assert!(!worker.retire_if_idle());
        assert_eq!(hub.subscriber_count("cam1"), 1);

        drop(sub);
        assert!(worker.retire_if_idle());
        assert_eq!(hub.subscriber_count("cam1"), 0);

        // A later reader gets a fresh feed nobody is pulling yet
        let _late = hub.subscribe("cam1").unwrap();
        assert!(!Arc::ptr_eq(&hub.feed("cam1"), &worker.feed));
        assert!(!hub.is_pulling("cam1"));
    }

    #[tokio::test]
    async fn test_local_stream_is_not_pulled() {
        let hub = hub();
        hub.ensure_running("cam1");
        assert!(!hub.is_pulling("cam1"));
    }
}
