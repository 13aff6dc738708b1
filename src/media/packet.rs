//! Packet and codec types carried on a stream's feed
//!
//! Packets are fanned out to every relay task attached to a stream, so they
//! are designed to be cheap to clone: the payload is a reference-counted
//! `Bytes`.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;

use super::aac::AudioSpecificConfig;
use super::h264::AvcConfig;

/// Kind of media carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecKind {
    Video,
    Audio,
}

/// Codec of one track
#[derive(Debug, Clone)]
pub enum CodecData {
    /// H.264 with its decoder configuration
    H264(AvcConfig),
    /// AAC with its AudioSpecificConfig
    Aac(AudioSpecificConfig),
    /// Any other codec, known only by name
    Other { kind: CodecKind, name: String },
}

impl CodecData {
    pub fn kind(&self) -> CodecKind {
        match self {
            CodecData::H264(_) => CodecKind::Video,
            CodecData::Aac(_) => CodecKind::Audio,
            CodecData::Other { kind, .. } => *kind,
        }
    }

    pub fn is_audio(&self) -> bool {
        self.kind() == CodecKind::Audio
    }

    pub fn is_video(&self) -> bool {
        self.kind() == CodecKind::Video
    }

    /// RFC 6381 style codec string (e.g. `avc1.64001f`)
    pub fn codec_string(&self) -> String {
        match self {
            CodecData::H264(config) => config.codec_string(),
            CodecData::Aac(config) => config.codec_string(),
            CodecData::Other { name, .. } => name.clone(),
        }
    }
}

impl fmt::Display for CodecData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecData::H264(config) => write!(
                f,
                "H264 {} {}",
                config.profile_name(),
                config.level_string()
            ),
            CodecData::Aac(config) => write!(
                f,
                "AAC {}Hz {}ch",
                config.sampling_frequency,
                config.channels()
            ),
            CodecData::Other { name, .. } => f.write_str(name),
        }
    }
}

/// One demuxed access unit
#[derive(Debug, Clone)]
pub struct Packet {
    /// Track index into the stream's codec set
    pub track: usize,
    /// Whether decoding can start at this packet
    pub is_keyframe: bool,
    /// Presentation time. Sources fill in their own clock; relay tasks
    /// overwrite it with the accumulated timeline.
    pub time: Duration,
    /// Duration of this packet
    pub duration: Duration,
    /// Composition time offset (video with B-frames)
    pub composition_offset: Duration,
    /// Codec payload (AVCC NAL units for H.264, raw frames for AAC)
    pub data: Bytes,
}

impl Packet {
    /// Create a video packet
    pub fn video(track: usize, is_keyframe: bool, duration: Duration, data: Bytes) -> Self {
        Self {
            track,
            is_keyframe,
            time: Duration::ZERO,
            duration,
            composition_offset: Duration::ZERO,
            data,
        }
    }

    /// Create an audio packet
    pub fn audio(track: usize, duration: Duration, data: Bytes) -> Self {
        Self {
            track,
            is_keyframe: false,
            time: Duration::ZERO,
            duration,
            composition_offset: Duration::ZERO,
            data,
        }
    }

    /// Set the source timestamp
    pub fn at(mut self, time: Duration) -> Self {
        self.time = time;
        self
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}
