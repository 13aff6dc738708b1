//! FLV muxer
//!
//! Produces an FLV byte stream split into self-contained pieces:
//!
//! - init segment: FLV header followed by the AVC and AAC sequence header tags
//! - fragments: runs of audio/video tags, cut before every video keyframe
//!   (audio-only streams are cut every `min_fragment` of media)
//!
//! Concatenating the init segment and the fragments in order yields a valid
//! FLV file. Tags are stamped with the packet's presentation time, so the
//! output timeline is whatever the relay task assigned.

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::MuxError;
use crate::media::{CodecData, CodecKind, FlvHeader, FlvTag, Packet};

use super::fragment::FragmentBuffer;
use super::{InitSegment, Muxer, MuxerFactory};

/// FLV video tag header byte for an AVC keyframe / inter frame
const AVC_KEYFRAME: u8 = 0x17;
const AVC_INTER_FRAME: u8 = 0x27;
/// FLV audio tag header byte for AAC (the rate/size/type bits are fixed for AAC)
const AAC_AUDIO: u8 = 0xAF;

/// Muxer tuning
#[derive(Debug, Clone)]
pub struct FlvMuxerConfig {
    /// Media duration after which an audio-only fragment is cut
    pub min_fragment: Duration,
    /// Size after which a fragment is cut even mid-GOP
    pub max_fragment_size: usize,
}

impl Default for FlvMuxerConfig {
    fn default() -> Self {
        Self {
            min_fragment: Duration::from_millis(500),
            max_fragment_size: 4 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrackPlan {
    Video,
    Audio,
    /// Track the container cannot carry; its packets are dropped
    Skip,
}

/// FLV muxer for H.264 video and AAC audio
#[derive(Debug)]
pub struct FlvMuxer {
    config: FlvMuxerConfig,
    tracks: Option<Vec<TrackPlan>>,
    buffer: FragmentBuffer,
}

impl FlvMuxer {
    pub fn new() -> Self {
        Self::with_config(FlvMuxerConfig::default())
    }

    pub fn with_config(config: FlvMuxerConfig) -> Self {
        let buffer = FragmentBuffer::with_max_size(config.max_fragment_size);
        Self {
            config,
            tracks: None,
            buffer,
        }
    }

    fn plan(codecs: &[CodecData]) -> Result<Vec<TrackPlan>, MuxError> {
        let mut has_video = false;
        let mut has_audio = false;

        let plan = codecs
            .iter()
            .enumerate()
            .map(|(track, codec)| match codec {
                CodecData::H264(_) if !has_video => {
                    has_video = true;
                    Ok(TrackPlan::Video)
                }
                CodecData::Aac(_) if !has_audio => {
                    has_audio = true;
                    Ok(TrackPlan::Audio)
                }
                CodecData::Other {
                    kind: CodecKind::Video,
                    name,
                } => Err(MuxError::UnsupportedCodec {
                    track,
                    codec: name.clone(),
                }),
                other => {
                    tracing::debug!(track, codec = %other, "Track not muxed");
                    Ok(TrackPlan::Skip)
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        if !has_video && !has_audio {
            return Err(MuxError::NoTracks);
        }
        Ok(plan)
    }

    fn has_video(&self) -> bool {
        self.tracks
            .as_ref()
            .is_some_and(|tracks| tracks.contains(&TrackPlan::Video))
    }

    fn media_tag(plan: TrackPlan, packet: &Packet) -> FlvTag {
        let timestamp = packet.time.as_millis() as u32;
        match plan {
            TrackPlan::Video => {
                let mut data = BytesMut::with_capacity(5 + packet.data.len());
                data.put_u8(if packet.is_keyframe {
                    AVC_KEYFRAME
                } else {
                    AVC_INTER_FRAME
                });
                data.put_u8(1);
                let cts = packet.composition_offset.as_millis() as u32;
                data.put_slice(&cts.to_be_bytes()[1..]);
                data.put_slice(&packet.data);
                FlvTag::video(timestamp, data.freeze())
            }
            _ => {
                let mut data = BytesMut::with_capacity(2 + packet.data.len());
                data.put_u8(AAC_AUDIO);
                data.put_u8(1);
                data.put_slice(&packet.data);
                FlvTag::audio(timestamp, data.freeze())
            }
        }
    }
}

impl Default for FlvMuxer {
    fn default() -> Self {
        Self::new()
    }
}

impl Muxer for FlvMuxer {
    fn initialize(&mut self, codecs: &[CodecData]) -> Result<(), MuxError> {
        if self.tracks.is_some() {
            return Err(MuxError::AlreadyInitialized);
        }
        self.tracks = Some(Self::plan(codecs)?);
        Ok(())
    }

    fn init_segment(&self, codecs: &[CodecData]) -> InitSegment {
        let plan = self.tracks.clone().unwrap_or_default();
        let muxed: Vec<&CodecData> = codecs
            .iter()
            .zip(plan.iter())
            .filter(|(_, plan)| **plan != TrackPlan::Skip)
            .map(|(codec, _)| codec)
            .collect();

        let header = FlvHeader::new(
            muxed.iter().any(|c| c.is_audio()),
            muxed.iter().any(|c| c.is_video()),
        );

        let mut data = BytesMut::new();
        header.encode(&mut data);
        for codec in &muxed {
            match codec {
                CodecData::H264(avc) => {
                    let mut body = BytesMut::with_capacity(5 + avc.raw.len());
                    body.put_slice(&[AVC_KEYFRAME, 0, 0, 0, 0]);
                    body.put_slice(&avc.raw);
                    FlvTag::video(0, body.freeze()).encode(&mut data);
                }
                CodecData::Aac(asc) => {
                    let mut body = BytesMut::with_capacity(2 + asc.raw.len());
                    body.put_slice(&[AAC_AUDIO, 0]);
                    body.put_slice(&asc.raw);
                    FlvTag::audio(0, body.freeze()).encode(&mut data);
                }
                CodecData::Other { .. } => {}
            }
        }

        let codecs = muxed
            .iter()
            .map(|c| c.codec_string())
            .collect::<Vec<_>>()
            .join(",");

        InitSegment {
            metadata: format!("video/x-flv; codecs=\"{}\"", codecs),
            data: data.freeze(),
        }
    }

    fn write_packet(&mut self, packet: &Packet) -> Result<Option<Bytes>, MuxError> {
        let plan = *self
            .tracks
            .as_ref()
            .ok_or(MuxError::NotInitialized)?
            .get(packet.track)
            .ok_or(MuxError::UnknownTrack(packet.track))?;

        if plan == TrackPlan::Skip {
            return Ok(None);
        }

        let tag = Self::media_tag(plan, packet);
        let starts_gop = plan == TrackPlan::Video && packet.is_keyframe;

        let mut ready = None;
        if (starts_gop && !self.buffer.is_empty()) || self.buffer.would_overflow(&tag) {
            ready = self.buffer.take();
        }

        self.buffer.push(&tag, packet.duration);

        if ready.is_none()
            && !self.has_video()
            && self.buffer.duration() >= self.config.min_fragment
        {
            ready = self.buffer.take();
        }

        Ok(ready)
    }
}

/// Creates [`FlvMuxer`]s sharing one configuration
#[derive(Debug, Clone, Default)]
pub struct FlvMuxerFactory {
    config: FlvMuxerConfig,
}

impl FlvMuxerFactory {
    pub fn new(config: FlvMuxerConfig) -> Self {
        Self { config }
    }
}

impl MuxerFactory for FlvMuxerFactory {
    fn create(&self) -> Box<dyn Muxer> {
        Box::new(FlvMuxer::with_config(self.config.clone()))
    }
}
