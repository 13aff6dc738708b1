//! HTTP-FLV ingest
//!
//! Pulls an upstream over HTTP, demuxes the FLV body incrementally and
//! publishes packets on the stream's feed.
//!
//! Track indices follow the codec set: video first, then audio. The codec
//! set is published once every track announced in the FLV header has its
//! codec, or after [`CODEC_PROBE_MS`] of media with whatever is known by
//! then. Frames that arrive before that are dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::time::Instant;
use tracing::Instrument;

use super::hub::{Feed, FeedMap};
use crate::config::SourceConfig;
use crate::error::{MediaError, SourceError};
use crate::media::{
    AacData, CodecData, CodecKind, FlvDemuxer, FlvTag, FlvTagType, H264Data, Packet,
};
use crate::media::flv::{AudioFormat, VideoCodec};

/// Media time after which the codec set is published even if incomplete
pub const CODEC_PROBE_MS: u32 = 1000;

/// Timestamp jumps larger than this are treated as discontinuities
const MAX_TIMESTAMP_DELTA_MS: u32 = 10_000;

const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(1);
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Output of [`PacketBuilder::push`]
#[derive(Debug, Clone)]
pub enum Built {
    Codecs(Vec<CodecData>),
    Packet(Packet),
}

#[derive(Debug, Default)]
struct TrackSlot {
    /// Announced in the FLV header
    expected: bool,
    codec: Option<CodecData>,
    /// Index in the published codec set
    index: Option<usize>,
    last_timestamp: Option<u32>,
    last_duration: Duration,
}

impl TrackSlot {
    fn expected() -> Self {
        Self {
            expected: true,
            ..Default::default()
        }
    }

    /// Duration of a packet at `timestamp`, from the delta to the previous one
    fn duration_at(&mut self, timestamp: u32) -> Duration {
        let duration = match self.last_timestamp {
            None => Duration::ZERO,
            Some(last) => {
                let delta = timestamp.wrapping_sub(last);
                if delta > MAX_TIMESTAMP_DELTA_MS {
                    self.last_duration
                } else {
                    Duration::from_millis(delta as u64)
                }
            }
        };
        self.last_timestamp = Some(timestamp);
        self.last_duration = duration;
        duration
    }

    fn set_codec(&mut self, codec: CodecData, published: bool) {
        match &self.codec {
            None if !published => self.codec = Some(codec),
            None => tracing::debug!(codec = %codec, "Track appeared after codecs were published, ignored"),
            Some(current) if current.codec_string() != codec.codec_string() => {
                tracing::warn!(from = %current, to = %codec, "Codec change mid-stream ignored");
            }
            Some(_) => {}
        }
    }
}

/// Turns FLV tags into packets and a codec set
#[derive(Debug)]
pub struct PacketBuilder {
    video: TrackSlot,
    audio: TrackSlot,
    first_timestamp: Option<u32>,
    published: bool,
}

impl PacketBuilder {
    /// Create a builder expecting the tracks announced in the FLV header
    ///
    /// A header announcing neither is treated as announcing both.
    pub fn new(has_video: bool, has_audio: bool) -> Self {
        let (has_video, has_audio) = if has_video || has_audio {
            (has_video, has_audio)
        } else {
            (true, true)
        };
        Self {
            video: if has_video { TrackSlot::expected() } else { TrackSlot::default() },
            audio: if has_audio { TrackSlot::expected() } else { TrackSlot::default() },
            first_timestamp: None,
            published: false,
        }
    }

    /// Whether the codec set has been emitted
    pub fn is_published(&self) -> bool {
        self.published
    }

    /// Process one tag
    pub fn push(&mut self, tag: FlvTag) -> Result<Vec<Built>, MediaError> {
        let mut out = Vec::new();
        if tag.data.is_empty() {
            return Ok(out);
        }

        let frame = match tag.tag_type {
            FlvTagType::Script => return Ok(out),
            FlvTagType::Video => self.video_tag(&tag)?,
            FlvTagType::Audio => self.audio_tag(&tag)?,
        };

        let first = *self.first_timestamp.get_or_insert(tag.timestamp);
        if !self.published && self.ready(tag.timestamp.wrapping_sub(first)) {
            out.push(Built::Codecs(self.publish()));
        }

        if let Some(packet) = frame {
            if let Some(packet) = self.place(packet) {
                out.push(Built::Packet(packet));
            }
        }
        Ok(out)
    }

    fn video_tag(&mut self, tag: &FlvTag) -> Result<Option<(CodecKind, Packet)>, MediaError> {
        let body = tag.data.slice(1..);
        let published = self.published;
        let time = Duration::from_millis(tag.timestamp as u64);

        let nalu_length_size = match &self.video.codec {
            Some(CodecData::H264(config)) => config.nalu_length_size,
            _ => 4,
        };

        match VideoCodec::from_byte(tag.data[0]) {
            VideoCodec::Avc => match H264Data::parse(body, nalu_length_size)? {
                H264Data::SequenceHeader(config) => {
                    self.video.set_codec(CodecData::H264(config), published);
                    Ok(None)
                }
                H264Data::Frame {
                    keyframe,
                    composition_time,
                    nalus,
                } => {
                    let duration = self.video.duration_at(tag.timestamp);
                    let mut packet =
                        Packet::video(0, tag.is_keyframe() || keyframe, duration, nalus).at(time);
                    packet.composition_offset =
                        Duration::from_millis(composition_time.max(0) as u64);
                    Ok(Some((CodecKind::Video, packet)))
                }
                H264Data::EndOfSequence => Ok(None),
            },
            other => {
                self.video.set_codec(
                    CodecData::Other {
                        kind: CodecKind::Video,
                        name: other.name(),
                    },
                    published,
                );
                let duration = self.video.duration_at(tag.timestamp);
                let packet = Packet::video(0, tag.is_keyframe(), duration, body).at(time);
                Ok(Some((CodecKind::Video, packet)))
            }
        }
    }

    fn audio_tag(&mut self, tag: &FlvTag) -> Result<Option<(CodecKind, Packet)>, MediaError> {
        let body = tag.data.slice(1..);
        let published = self.published;
        let time = Duration::from_millis(tag.timestamp as u64);

        match AudioFormat::from_byte(tag.data[0]) {
            AudioFormat::Aac => match AacData::parse(body)? {
                AacData::SequenceHeader(config) => {
                    self.audio.set_codec(CodecData::Aac(config), published);
                    Ok(None)
                }
                AacData::Frame { data } => {
                    self.audio.duration_at(tag.timestamp);
                    let duration = match &self.audio.codec {
                        Some(CodecData::Aac(config)) => config.frame_duration(),
                        _ => self.audio.last_duration,
                    };
                    Ok(Some((CodecKind::Audio, Packet::audio(0, duration, data).at(time))))
                }
            },
            other => {
                self.audio.set_codec(
                    CodecData::Other {
                        kind: CodecKind::Audio,
                        name: other.name(),
                    },
                    published,
                );
                let duration = self.audio.duration_at(tag.timestamp);
                Ok(Some((CodecKind::Audio, Packet::audio(0, duration, body).at(time))))
            }
        }
    }

    fn ready(&self, elapsed_ms: u32) -> bool {
        let known = |slot: &TrackSlot| slot.codec.is_some();
        let complete = |slot: &TrackSlot| !slot.expected || known(slot);

        let any_known = known(&self.video) || known(&self.audio);
        any_known
            && ((complete(&self.video) && complete(&self.audio)) || elapsed_ms >= CODEC_PROBE_MS)
    }

    fn publish(&mut self) -> Vec<CodecData> {
        let mut codecs = Vec::with_capacity(2);
        for slot in [&mut self.video, &mut self.audio] {
            if let Some(codec) = &slot.codec {
                slot.index = Some(codecs.len());
                codecs.push(codec.clone());
            } else if slot.expected {
                tracing::warn!("Announced track never sent its codec, dropped");
            }
        }
        self.published = true;
        codecs
    }

    /// Assign the packet its track index, or drop it if the track is not
    /// part of the published codec set
    fn place(&self, (kind, mut packet): (CodecKind, Packet)) -> Option<Packet> {
        let slot = match kind {
            CodecKind::Video => &self.video,
            CodecKind::Audio => &self.audio,
        };
        packet.track = slot.index?;
        Some(packet)
    }
}

enum PullEnd {
    /// Upstream closed the body
    Eof,
    /// No subscribers for the idle timeout
    Idle,
}

/// Pulls one upstream into a feed
pub(crate) struct IngestWorker {
    pub(crate) stream: String,
    pub(crate) url: String,
    pub(crate) client: reqwest::Client,
    pub(crate) feed: Arc<Feed>,
    pub(crate) feeds: FeedMap,
    pub(crate) config: SourceConfig,
}

impl IngestWorker {
    pub(crate) async fn run(self) {
        let span = tracing::info_span!("ingest", stream = %self.stream);
        async move {
            loop {
                match self.pull().await {
                    Ok(PullEnd::Eof) => {
                        tracing::info!("Upstream ended");
                        break;
                    }
                    Ok(PullEnd::Idle) => {
                        tracing::info!(
                            idle = ?self.config.idle_timeout(),
                            "No subscribers, upstream pull stopped"
                        );
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Upstream pull failed");
                        if !self.config.reconnect || self.feed.subscriber_count() == 0 {
                            break;
                        }
                        tokio::time::sleep(RECONNECT_DELAY).await;
                        tracing::info!(url = %self.url, "Reconnecting upstream");
                    }
                }
            }
            self.remove_feed();
        }
        .instrument(span)
        .await
    }

    async fn pull(&self) -> Result<PullEnd, SourceError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|source| SourceError::Request {
                url: self.url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                url: self.url.clone(),
                status,
            });
        }

        tracing::debug!(url = %self.url, "Upstream connected");

        let body = response.bytes_stream();
        tokio::pin!(body);
        let mut demuxer = FlvDemuxer::new();
        let mut builder: Option<PacketBuilder> = None;
        let mut idle_check = tokio::time::interval(IDLE_CHECK_INTERVAL);
        let mut idle_since: Option<Instant> = None;

        loop {
            tokio::select! {
                chunk = body.next() => {
                    let chunk: Bytes = match chunk {
                        None => return Ok(PullEnd::Eof),
                        Some(Err(source)) => {
                            return Err(SourceError::Request { url: self.url.clone(), source });
                        }
                        Some(Ok(chunk)) => chunk,
                    };
                    demuxer.push(&chunk);
                    self.drain(&mut demuxer, &mut builder)?;
                }
                _ = idle_check.tick() => {
                    if self.feed.subscriber_count() > 0 {
                        idle_since = None;
                        continue;
                    }
                    let since = *idle_since.get_or_insert_with(Instant::now);
                    if since.elapsed() >= self.config.idle_timeout() {
                        if self.retire_if_idle() {
                            return Ok(PullEnd::Idle);
                        }
                        idle_since = None;
                    }
                }
            }
        }
    }

    fn drain(
        &self,
        demuxer: &mut FlvDemuxer,
        builder: &mut Option<PacketBuilder>,
    ) -> Result<(), SourceError> {
        loop {
            let tag = demuxer.next_tag().map_err(|source| SourceError::Media {
                url: self.url.clone(),
                source,
            })?;
            let Some(tag) = tag else {
                return Ok(());
            };

            let builder = builder.get_or_insert_with(|| {
                let (video, audio) = demuxer
                    .header()
                    .map_or((true, true), |h| (h.has_video, h.has_audio));
                PacketBuilder::new(video, audio)
            });

            let built = match builder.push(tag) {
                Ok(built) => built,
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping malformed tag");
                    continue;
                }
            };

            for item in built {
                match item {
                    Built::Codecs(codecs) => {
                        let names: Vec<String> = codecs.iter().map(ToString::to_string).collect();
                        tracing::info!(codecs = ?names, "Upstream codecs known");
                        self.feed.set_codecs(codecs);
                    }
                    Built::Packet(packet) => {
                        self.feed.publish(packet);
                    }
                }
            }
        }
    }

    /// Remove the feed if it still has no subscribers
    ///
    /// Checked under the map lock, which `SourceHub::subscribe` also takes,
    /// so a reader arriving concurrently either keeps this feed alive or
    /// gets a fresh one.
    pub(crate) fn retire_if_idle(&self) -> bool {
        let mut feeds = self.feeds.lock();
        if self.feed.subscriber_count() > 0 {
            return false;
        }
        self.remove_locked(&mut feeds);
        true
    }

    fn remove_feed(&self) {
        self.remove_locked(&mut self.feeds.lock());
    }

    /// Remove our feed, leaving any newer feed of the stream alone
    fn remove_locked(&self, feeds: &mut HashMap<String, Arc<Feed>>) {
        if feeds
            .get(&self.stream)
            .is_some_and(|feed| Arc::ptr_eq(feed, &self.feed))
        {
            feeds.remove(&self.stream);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::h264::tests::AVC_RECORD;

    fn avc_sequence_header() -> FlvTag {
        let mut data = vec![0x17, 0x00, 0, 0, 0];
        data.extend_from_slice(AVC_RECORD);
        FlvTag::video(0, Bytes::from(data))
    }

    fn avc_frame(timestamp: u32, keyframe: bool) -> FlvTag {
        let first = if keyframe { 0x17 } else { 0x27 };
        let nal = if keyframe { 0x65 } else { 0x41 };
        FlvTag::video(
            timestamp,
            Bytes::from(vec![first, 0x01, 0, 0, 0, 0, 0, 0, 2, nal, 0x88]),
        )
    }

    fn aac_sequence_header() -> FlvTag {
        FlvTag::audio(0, Bytes::from_static(&[0xAF, 0x00, 0x12, 0x10]))
    }

    fn aac_frame(timestamp: u32) -> FlvTag {
        FlvTag::audio(timestamp, Bytes::from_static(&[0xAF, 0x01, 0x21, 0x00]))
    }

    fn packets(built: Vec<Built>) -> Vec<Packet> {
        built
            .into_iter()
            .filter_map(|b| match b {
                Built::Packet(p) => Some(p),
                Built::Codecs(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_codecs_published_when_complete() {
        let mut builder = PacketBuilder::new(true, true);

        assert!(builder.push(avc_sequence_header()).unwrap().is_empty());
        assert!(!builder.is_published());

        let built = builder.push(aac_sequence_header()).unwrap();
        assert_eq!(built.len(), 1);
        let Built::Codecs(codecs) = &built[0] else {
            panic!("expected codecs");
        };
        assert_eq!(codecs.len(), 2);
        assert!(codecs[0].is_video());
        assert!(codecs[1].is_audio());
        assert!(builder.is_published());
    }

    #[test]
    fn test_track_indices_and_durations() {
        let mut builder = PacketBuilder::new(true, true);
        builder.push(avc_sequence_header()).unwrap();
        builder.push(aac_sequence_header()).unwrap();

        let key = packets(builder.push(avc_frame(0, true)).unwrap());
        assert_eq!(key.len(), 1);
        assert_eq!(key[0].track, 0);
        assert!(key[0].is_keyframe);
        assert_eq!(key[0].duration, Duration::ZERO);

        let next = packets(builder.push(avc_frame(40, false)).unwrap());
        assert!(!next[0].is_keyframe);
        assert_eq!(next[0].duration, Duration::from_millis(40));
        assert_eq!(next[0].time, Duration::from_millis(40));

        let audio = packets(builder.push(aac_frame(23)).unwrap());
        assert_eq!(audio[0].track, 1);
        // 1024 samples at 44.1kHz
        assert_eq!(audio[0].duration, Duration::from_nanos(23_219_954));
    }

    #[test]
    fn test_idr_found_with_stream_nalu_length() {
        // Same record announcing 2-byte NAL unit lengths
        let mut data = vec![0x17, 0x00, 0, 0, 0];
        data.extend_from_slice(AVC_RECORD);
        data[5 + 4] = 0xFD;

        let mut builder = PacketBuilder::new(true, false);
        builder.push(FlvTag::video(0, Bytes::from(data))).unwrap();
        assert!(builder.is_published());

        // Inter frame type, but the access unit holds an IDR slice
        let frame = FlvTag::video(40, Bytes::from_static(&[0x27, 0x01, 0, 0, 0, 0, 2, 0x65, 0x88]));
        let built = packets(builder.push(frame).unwrap());
        assert!(built[0].is_keyframe);
    }

    #[test]
    fn test_frames_before_codecs_dropped() {
        let mut builder = PacketBuilder::new(true, false);
        assert!(builder.push(avc_frame(0, true)).unwrap().is_empty());

        builder.push(avc_sequence_header()).unwrap();
        assert!(builder.is_published());
        assert_eq!(packets(builder.push(avc_frame(40, true)).unwrap()).len(), 1);
    }

    #[test]
    fn test_missing_track_dropped_after_probe() {
        let mut builder = PacketBuilder::new(true, true);
        builder.push(avc_sequence_header()).unwrap();
        builder.push(avc_frame(0, true)).unwrap();
        assert!(!builder.is_published());

        let built = builder.push(avc_frame(CODEC_PROBE_MS, true)).unwrap();
        let Built::Codecs(codecs) = &built[0] else {
            panic!("expected codecs");
        };
        assert_eq!(codecs.len(), 1);
        assert_eq!(packets(built).len(), 1);

        // Audio arriving later is not part of the stream
        assert!(builder.push(aac_sequence_header()).unwrap().is_empty());
        assert!(packets(builder.push(aac_frame(1010)).unwrap()).is_empty());
    }

    #[test]
    fn test_non_aac_audio_is_other_codec() {
        let mut builder = PacketBuilder::new(false, true);
        let built = builder
            .push(FlvTag::audio(0, Bytes::from_static(&[0x2F, 0xFF, 0xFB])))
            .unwrap();

        let Built::Codecs(codecs) = &built[0] else {
            panic!("expected codecs");
        };
        assert_eq!(codecs[0].codec_string(), "mp3");
        assert_eq!(packets(built).len(), 1);
    }

    #[test]
    fn test_timestamp_jump_reuses_last_duration() {
        let mut slot = TrackSlot::expected();
        assert_eq!(slot.duration_at(0), Duration::ZERO);
        assert_eq!(slot.duration_at(40), Duration::from_millis(40));
        assert_eq!(slot.duration_at(90_000), Duration::from_millis(40));
    }

    #[test]
    fn test_malformed_avc_is_error() {
        let mut builder = PacketBuilder::new(true, false);
        let result = builder.push(FlvTag::video(0, Bytes::from_static(&[0x17, 0x01])));
        assert_eq!(result.unwrap_err(), MediaError::InvalidAvcPacket);
    }
}
