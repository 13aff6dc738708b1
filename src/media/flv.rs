//! FLV container: tag model, incremental demuxer and tag writer
//!
//! FLV file layout:
//! ```text
//! +------------+-------------------+-----+-------------------+-----
//! | Header (9) | PreviousTagSize0  | Tag | PreviousTagSize1  | ...
//! +------------+-------------------+-----+-------------------+-----
//! ```
//!
//! Tag layout:
//! ```text
//! +---------+-------------+-----------+--------------+-------------+---------+
//! | Type(1) | DataSize(3) | TS(3)     | TSExtended(1)| StreamID(3) | Data(N) |
//! +---------+-------------+-----------+--------------+-------------+---------+
//! ```
//!
//! Video data starts with `FrameType(4 bits) | CodecID(4 bits)`, audio data
//! with `SoundFormat(4) | SoundRate(2) | SoundSize(1) | SoundType(1)`.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::MediaError;

/// Size of the fixed tag header
pub const TAG_HEADER_SIZE: usize = 11;

const FLV_HEADER_SIZE: usize = 9;
const FLAG_AUDIO: u8 = 0x04;
const FLAG_VIDEO: u8 = 0x01;
const FLAG_FILTER: u8 = 0x20;

/// FLV tag type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlvTagType {
    Audio,
    Video,
    Script,
}

impl FlvTagType {
    /// `None` for unknown types and for filtered (encrypted) tags
    fn from_byte(b: u8) -> Option<Self> {
        if b & FLAG_FILTER != 0 {
            return None;
        }
        match b & 0x1F {
            8 => Some(FlvTagType::Audio),
            9 => Some(FlvTagType::Video),
            18 => Some(FlvTagType::Script),
            _ => None,
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            FlvTagType::Audio => 8,
            FlvTagType::Video => 9,
            FlvTagType::Script => 18,
        }
    }
}

/// Video codec ID (lower 4 bits of the first video byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    SorensonH263,
    Vp6,
    Avc,
    Hevc,
    Other(u8),
}

impl VideoCodec {
    pub fn from_byte(b: u8) -> Self {
        match b & 0x0F {
            2 => VideoCodec::SorensonH263,
            4 => VideoCodec::Vp6,
            7 => VideoCodec::Avc,
            12 => VideoCodec::Hevc,
            other => VideoCodec::Other(other),
        }
    }

    pub fn name(&self) -> String {
        match self {
            VideoCodec::SorensonH263 => "h263".into(),
            VideoCodec::Vp6 => "vp6".into(),
            VideoCodec::Avc => "h264".into(),
            VideoCodec::Hevc => "h265".into(),
            VideoCodec::Other(id) => format!("video codec {}", id),
        }
    }
}

/// Audio format (upper 4 bits of the first audio byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Mp3,
    G711ALaw,
    G711MuLaw,
    Aac,
    Speex,
    Other(u8),
}

impl AudioFormat {
    pub fn from_byte(b: u8) -> Self {
        match (b >> 4) & 0x0F {
            2 | 14 => AudioFormat::Mp3,
            7 => AudioFormat::G711ALaw,
            8 => AudioFormat::G711MuLaw,
            10 => AudioFormat::Aac,
            11 => AudioFormat::Speex,
            other => AudioFormat::Other(other),
        }
    }

    pub fn name(&self) -> String {
        match self {
            AudioFormat::Mp3 => "mp3".into(),
            AudioFormat::G711ALaw => "pcm_alaw".into(),
            AudioFormat::G711MuLaw => "pcm_mulaw".into(),
            AudioFormat::Aac => "aac".into(),
            AudioFormat::Speex => "speex".into(),
            AudioFormat::Other(id) => format!("audio format {}", id),
        }
    }
}

/// FLV tag
#[derive(Debug, Clone)]
pub struct FlvTag {
    pub tag_type: FlvTagType,
    /// Timestamp in milliseconds
    pub timestamp: u32,
    /// Tag body (including codec headers)
    pub data: Bytes,
}

impl FlvTag {
    pub fn video(timestamp: u32, data: Bytes) -> Self {
        Self {
            tag_type: FlvTagType::Video,
            timestamp,
            data,
        }
    }

    pub fn audio(timestamp: u32, data: Bytes) -> Self {
        Self {
            tag_type: FlvTagType::Audio,
            timestamp,
            data,
        }
    }

    pub fn is_video(&self) -> bool {
        self.tag_type == FlvTagType::Video
    }

    pub fn is_audio(&self) -> bool {
        self.tag_type == FlvTagType::Audio
    }

    pub fn video_codec(&self) -> Option<VideoCodec> {
        (self.is_video() && !self.data.is_empty()).then(|| VideoCodec::from_byte(self.data[0]))
    }

    pub fn audio_format(&self) -> Option<AudioFormat> {
        (self.is_audio() && !self.data.is_empty()).then(|| AudioFormat::from_byte(self.data[0]))
    }

    /// Keyframe or generated keyframe (frame types 1 and 4)
    pub fn is_keyframe(&self) -> bool {
        self.is_video() && !self.data.is_empty() && matches!(self.data[0] >> 4, 1 | 4)
    }

    pub fn is_avc_sequence_header(&self) -> bool {
        self.video_codec() == Some(VideoCodec::Avc) && self.data.len() >= 2 && self.data[1] == 0
    }

    pub fn is_aac_sequence_header(&self) -> bool {
        self.audio_format() == Some(AudioFormat::Aac) && self.data.len() >= 2 && self.data[1] == 0
    }

    /// Size of the tag body
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Bytes this tag occupies once encoded, including the trailing
    /// PreviousTagSize field
    pub fn encoded_len(&self) -> usize {
        TAG_HEADER_SIZE + self.data.len() + 4
    }

    /// Append the tag and its PreviousTagSize field
    pub fn encode(&self, out: &mut BytesMut) {
        let size = self.data.len() as u32;
        out.reserve(self.encoded_len());
        out.put_u8(self.tag_type.to_byte());
        put_u24(out, size);
        put_u24(out, self.timestamp & 0x00FF_FFFF);
        out.put_u8((self.timestamp >> 24) as u8);
        put_u24(out, 0);
        out.put_slice(&self.data);
        out.put_u32(TAG_HEADER_SIZE as u32 + size);
    }
}

/// FLV file header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlvHeader {
    pub has_audio: bool,
    pub has_video: bool,
}

impl FlvHeader {
    pub fn new(has_audio: bool, has_video: bool) -> Self {
        Self {
            has_audio,
            has_video,
        }
    }

    /// Parse the 9-byte header, returning it with its declared data offset
    pub fn parse(data: &[u8]) -> Result<(Self, usize), MediaError> {
        if data.len() < FLV_HEADER_SIZE || &data[..3] != b"FLV" || data[3] != 1 {
            return Err(MediaError::InvalidFlvHeader);
        }

        let flags = data[4];
        let offset = u32::from_be_bytes([data[5], data[6], data[7], data[8]]) as usize;
        if offset < FLV_HEADER_SIZE {
            return Err(MediaError::InvalidFlvHeader);
        }

        Ok((
            Self::new(flags & FLAG_AUDIO != 0, flags & FLAG_VIDEO != 0),
            offset,
        ))
    }

    /// Append the header and PreviousTagSize0
    pub fn encode(&self, out: &mut BytesMut) {
        let mut flags = 0;
        if self.has_audio {
            flags |= FLAG_AUDIO;
        }
        if self.has_video {
            flags |= FLAG_VIDEO;
        }

        out.put_slice(b"FLV");
        out.put_u8(1);
        out.put_u8(flags);
        out.put_u32(FLV_HEADER_SIZE as u32);
        out.put_u32(0);
    }
}

/// Incremental FLV demuxer
///
/// Bytes are pushed as they arrive from the network; complete tags are
/// pulled out with [`FlvDemuxer::next_tag`].
#[derive(Debug, Default)]
pub struct FlvDemuxer {
    buf: BytesMut,
    header: Option<FlvHeader>,
}

impl FlvDemuxer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// The file header, once it has been read
    pub fn header(&self) -> Option<&FlvHeader> {
        self.header.as_ref()
    }

    /// Next complete tag, or `None` if more bytes are needed
    pub fn next_tag(&mut self) -> Result<Option<FlvTag>, MediaError> {
        if self.header.is_none() {
            if self.buf.len() < FLV_HEADER_SIZE {
                return Ok(None);
            }
            let (header, offset) = FlvHeader::parse(&self.buf[..FLV_HEADER_SIZE])?;
            // Header, any extension bytes, then PreviousTagSize0
            if self.buf.len() < offset + 4 {
                return Ok(None);
            }
            self.buf.advance(offset + 4);
            self.header = Some(header);
        }

        loop {
            if self.buf.len() < TAG_HEADER_SIZE {
                return Ok(None);
            }

            let size = read_u24(&self.buf[1..4]) as usize;
            let total = TAG_HEADER_SIZE + size + 4;
            if self.buf.len() < total {
                return Ok(None);
            }

            let type_byte = self.buf[0];
            let timestamp = read_u24(&self.buf[4..7]) | (self.buf[7] as u32) << 24;
            let tag = self.buf.split_to(total).freeze();

            let Some(tag_type) = FlvTagType::from_byte(type_byte) else {
                tracing::debug!(tag_type = type_byte, size, "Skipping unsupported FLV tag");
                continue;
            };

            return Ok(Some(FlvTag {
                tag_type,
                timestamp,
                data: tag.slice(TAG_HEADER_SIZE..TAG_HEADER_SIZE + size),
            }));
        }
    }
}

fn read_u24(b: &[u8]) -> u32 {
    (b[0] as u32) << 16 | (b[1] as u32) << 8 | b[2] as u32
}

fn put_u24(out: &mut BytesMut, v: u32) {
    out.put_u8((v >> 16) as u8);
    out.put_u8((v >> 8) as u8);
    out.put_u8(v as u8);
}
