//! H.264/AVC parsing
//!
//! FLV carries H.264 in AVCC format (length-prefixed NAL units).
//!
//! AVC video tag body:
//! ```text
//! +----------+----------+-----------------+-----------------+------
//! |FrameType | CodecID  | AVCPacketType   | CompositionTime | Data
//! | (4 bits) | (4 bits) | (1 byte)        | (3 bytes, SI24) |
//! +----------+----------+-----------------+-----------------+------
//! ```
//!
//! AVCDecoderConfigurationRecord (sequence header):
//! ```text
//! configurationVersion (1) | AVCProfileIndication (1) | profile_compatibility (1)
//! | AVCLevelIndication (1) | lengthSizeMinusOne (1, lower 2 bits)
//! | numOfSPS (1, lower 5 bits) | { spsLength (2) | spsNALUnit }*
//! | numOfPPS (1) | { ppsLength (2) | ppsNALUnit }*
//! ```

use bytes::{Buf, Bytes};

use crate::error::MediaError;

/// AVC packet type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvcPacketType {
    SequenceHeader = 0,
    Nalu = 1,
    EndOfSequence = 2,
}

impl AvcPacketType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(AvcPacketType::SequenceHeader),
            1 => Some(AvcPacketType::Nalu),
            2 => Some(AvcPacketType::EndOfSequence),
            _ => None,
        }
    }
}

/// NAL unit types the relay looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NaluType {
    Slice,
    Idr,
    Sei,
    Sps,
    Pps,
    Aud,
    Other(u8),
}

impl NaluType {
    pub fn from_byte(b: u8) -> Self {
        match b & 0x1F {
            1 => NaluType::Slice,
            5 => NaluType::Idr,
            6 => NaluType::Sei,
            7 => NaluType::Sps,
            8 => NaluType::Pps,
            9 => NaluType::Aud,
            other => NaluType::Other(other),
        }
    }
}

/// AVC decoder configuration (from sequence header)
#[derive(Debug, Clone)]
pub struct AvcConfig {
    /// AVC profile (66=Baseline, 77=Main, 100=High, etc.)
    pub profile: u8,
    /// Profile compatibility flags
    pub compatibility: u8,
    /// AVC level (e.g., 31 = 3.1)
    pub level: u8,
    /// NALU length size in bytes (usually 4)
    pub nalu_length_size: u8,
    pub sps: Vec<Bytes>,
    pub pps: Vec<Bytes>,
    /// Raw AVCDecoderConfigurationRecord bytes
    pub raw: Bytes,
}

impl AvcConfig {
    /// Parse an AVCDecoderConfigurationRecord
    pub fn parse(data: Bytes) -> Result<Self, MediaError> {
        if data.len() < 7 {
            return Err(MediaError::InvalidAvcPacket);
        }

        let raw = data.clone();
        let mut data = data;

        if data.get_u8() != 1 {
            return Err(MediaError::InvalidAvcPacket);
        }

        let profile = data.get_u8();
        let compatibility = data.get_u8();
        let level = data.get_u8();
        let nalu_length_size = (data.get_u8() & 0x03) + 1;

        let num_sps = (data.get_u8() & 0x1F) as usize;
        let sps = Self::parse_parameter_sets(&mut data, num_sps)?;

        if data.is_empty() {
            return Err(MediaError::InvalidAvcPacket);
        }
        let num_pps = data.get_u8() as usize;
        let pps = Self::parse_parameter_sets(&mut data, num_pps)?;

        Ok(AvcConfig {
            profile,
            compatibility,
            level,
            nalu_length_size,
            sps,
            pps,
            raw,
        })
    }

    fn parse_parameter_sets(data: &mut Bytes, count: usize) -> Result<Vec<Bytes>, MediaError> {
        let mut sets = Vec::with_capacity(count);
        for _ in 0..count {
            if data.len() < 2 {
                return Err(MediaError::InvalidAvcPacket);
            }
            let len = data.get_u16() as usize;
            if data.len() < len {
                return Err(MediaError::InvalidAvcPacket);
            }
            sets.push(data.copy_to_bytes(len));
        }
        Ok(sets)
    }

    pub fn profile_name(&self) -> &'static str {
        match self.profile {
            66 => "Baseline",
            77 => "Main",
            88 => "Extended",
            100 => "High",
            110 => "High 10",
            122 => "High 4:2:2",
            244 => "High 4:4:4",
            _ => "Unknown",
        }
    }

    /// Level as string (e.g., "3.1")
    pub fn level_string(&self) -> String {
        format!("{}.{}", self.level / 10, self.level % 10)
    }

    /// RFC 6381 codec string, `avc1.PPCCLL`
    pub fn codec_string(&self) -> String {
        format!(
            "avc1.{:02x}{:02x}{:02x}",
            self.profile, self.compatibility, self.level
        )
    }
}

/// Parsed AVC video tag body (after the frame type/codec byte)
#[derive(Debug, Clone)]
pub enum H264Data {
    SequenceHeader(AvcConfig),

    Frame {
        /// Whether the access unit contains an IDR slice
        keyframe: bool,
        /// Composition time offset in milliseconds
        composition_time: i32,
        /// NAL units in AVCC format
        nalus: Bytes,
    },

    EndOfSequence,
}

impl H264Data {
    /// Parse a tag body whose NAL units carry `nalu_length_size`-byte
    /// length prefixes, as announced by the stream's [`AvcConfig`]
    pub fn parse(mut data: Bytes, nalu_length_size: u8) -> Result<Self, MediaError> {
        if data.len() < 4 {
            return Err(MediaError::InvalidAvcPacket);
        }

        let packet_type = data.get_u8();

        // Signed 24-bit composition time
        let composition_time = ((data.get_u8() as i32) << 16)
            | ((data.get_u8() as i32) << 8)
            | data.get_u8() as i32;
        let composition_time = if composition_time & 0x800000 != 0 {
            composition_time | !0xFFFFFF
        } else {
            composition_time
        };

        match AvcPacketType::from_byte(packet_type) {
            Some(AvcPacketType::SequenceHeader) => Ok(H264Data::SequenceHeader(AvcConfig::parse(data)?)),
            Some(AvcPacketType::Nalu) => Ok(H264Data::Frame {
                keyframe: NaluIterator::new(&data, nalu_length_size).any(|nalu| {
                    !nalu.is_empty() && NaluType::from_byte(nalu[0]) == NaluType::Idr
                }),
                composition_time,
                nalus: data,
            }),
            Some(AvcPacketType::EndOfSequence) => Ok(H264Data::EndOfSequence),
            None => Err(MediaError::InvalidAvcPacket),
        }
    }
}

/// Iterator over NAL units in AVCC format
pub struct NaluIterator<'a> {
    data: &'a [u8],
    offset: usize,
    nalu_length_size: usize,
}

impl<'a> NaluIterator<'a> {
    pub fn new(data: &'a [u8], nalu_length_size: u8) -> Self {
        Self {
            data,
            offset: 0,
            nalu_length_size: nalu_length_size as usize,
        }
    }
}

impl<'a> Iterator for NaluIterator<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset + self.nalu_length_size > self.data.len() {
            return None;
        }

        let len = self.data[self.offset..self.offset + self.nalu_length_size]
            .iter()
            .fold(0usize, |len, b| (len << 8) | *b as usize);
        self.offset += self.nalu_length_size;

        if self.offset + len > self.data.len() {
            return None;
        }

        let nalu = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Some(nalu)
    }
}
