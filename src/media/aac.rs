//! AAC audio parsing
//!
//! FLV carries AAC without ADTS headers.
//!
//! AAC audio tag body:
//! ```text
//! +-----------+----------+----------+----------+---------+--------
//! |SoundFormat|SoundRate |SoundSize |SoundType | AACType | AACData
//! | (4 bits)  | (2 bits) | (1 bit)  | (1 bit)  | (1 byte)|
//! +-----------+----------+----------+----------+---------+--------
//! ```
//!
//! AACPacketType 0 is the sequence header (AudioSpecificConfig), 1 a raw frame.

use std::time::Duration;

use bytes::{Buf, Bytes};

use crate::error::MediaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AacPacketType {
    SequenceHeader = 0,
    Raw = 1,
}

impl AacPacketType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(AacPacketType::SequenceHeader),
            1 => Some(AacPacketType::Raw),
            _ => None,
        }
    }
}

/// AudioSpecificConfig (from sequence header)
#[derive(Debug, Clone)]
pub struct AudioSpecificConfig {
    /// Audio object type (2 = AAC LC)
    pub audio_object_type: u8,
    pub sampling_frequency_index: u8,
    /// Sampling frequency in Hz
    pub sampling_frequency: u32,
    /// Channel configuration (1=mono, 2=stereo, etc.)
    pub channel_configuration: u8,
    /// 960 sample frames when set, 1024 otherwise
    pub frame_length_flag: bool,
    /// Raw config bytes
    pub raw: Bytes,
}

impl AudioSpecificConfig {
    const SAMPLING_FREQUENCIES: [u32; 13] = [
        96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
    ];

    /// Parse from AAC sequence header data
    pub fn parse(data: Bytes) -> Result<Self, MediaError> {
        if data.len() < 2 {
            return Err(MediaError::InvalidAacPacket);
        }

        // audioObjectType: 5 bits, samplingFrequencyIndex: 4 bits,
        // [samplingFrequency: 24 bits], channelConfiguration: 4 bits
        let b0 = data[0];
        let b1 = data[1];

        let audio_object_type = (b0 >> 3) & 0x1F;
        let sampling_frequency_index = ((b0 & 0x07) << 1) | ((b1 >> 7) & 0x01);

        let (sampling_frequency, rest) = if sampling_frequency_index == 0x0F {
            if data.len() < 5 {
                return Err(MediaError::InvalidAacPacket);
            }
            let frequency = ((data[1] as u32 & 0x7F) << 17)
                | ((data[2] as u32) << 9)
                | ((data[3] as u32) << 1)
                | (data[4] as u32 >> 7);
            // Channel configuration follows the explicit frequency
            (frequency, (data[4] << 1) & 0xFE)
        } else {
            let frequency = *Self::SAMPLING_FREQUENCIES
                .get(sampling_frequency_index as usize)
                .ok_or(MediaError::InvalidAacPacket)?;
            (frequency, b1 << 1)
        };

        let channel_configuration = (rest >> 4) & 0x0F;
        let frame_length_flag = (rest & 0x08) != 0;

        Ok(AudioSpecificConfig {
            audio_object_type,
            sampling_frequency_index,
            sampling_frequency,
            channel_configuration,
            frame_length_flag,
            raw: data,
        })
    }

    pub fn channels(&self) -> u8 {
        match self.channel_configuration {
            7 => 8,
            c @ 0..=6 => c,
            _ => 0,
        }
    }

    pub fn samples_per_frame(&self) -> u32 {
        if self.frame_length_flag {
            960
        } else {
            1024
        }
    }

    /// Playback duration of one raw frame
    pub fn frame_duration(&self) -> Duration {
        if self.sampling_frequency == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(
            self.samples_per_frame() as u64 * 1_000_000_000 / self.sampling_frequency as u64,
        )
    }

    /// RFC 6381 codec string, `mp4a.40.<object type>`
    pub fn codec_string(&self) -> String {
        format!("mp4a.40.{}", self.audio_object_type)
    }
}

/// Parsed AAC audio tag body (after the format byte)
#[derive(Debug, Clone)]
pub enum AacData {
    SequenceHeader(AudioSpecificConfig),
    Frame { data: Bytes },
}

impl AacData {
    pub fn parse(mut data: Bytes) -> Result<Self, MediaError> {
        if data.is_empty() {
            return Err(MediaError::InvalidAacPacket);
        }

        match AacPacketType::from_byte(data.get_u8()) {
            Some(AacPacketType::SequenceHeader) => {
                Ok(AacData::SequenceHeader(AudioSpecificConfig::parse(data)?))
            }
            Some(AacPacketType::Raw) => Ok(AacData::Frame { data }),
            None => Err(MediaError::InvalidAacPacket),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_specific_config_parse() {
        // AAC-LC, 44100 Hz, stereo
        let config = AudioSpecificConfig::parse(Bytes::from_static(&[0x12, 0x10])).unwrap();
        assert_eq!(config.audio_object_type, 2);
        assert_eq!(config.sampling_frequency_index, 4);
        assert_eq!(config.sampling_frequency, 44100);
        assert_eq!(config.channel_configuration, 2);
        assert_eq!(config.channels(), 2);
        assert!(!config.frame_length_flag);
        assert_eq!(config.codec_string(), "mp4a.40.2");
    }

    #[test]
    fn test_frame_duration() {
        // AAC-LC, 48000 Hz, mono
        let config = AudioSpecificConfig::parse(Bytes::from_static(&[0x11, 0x88])).unwrap();
        assert_eq!(config.sampling_frequency, 48000);
        assert_eq!(config.channels(), 1);
        assert_eq!(config.frame_duration(), Duration::from_nanos(21_333_333));
    }

    #[test]
    fn test_reserved_frequency_index() {
        // index 13 is reserved
        assert!(AudioSpecificConfig::parse(Bytes::from_static(&[0x16, 0x90])).is_err());
        assert!(AudioSpecificConfig::parse(Bytes::from_static(&[0x12])).is_err());
    }

    #[test]
    fn test_aac_data() {
        let header = AacData::parse(Bytes::from_static(&[0x00, 0x12, 0x10])).unwrap();
        assert!(matches!(header, AacData::SequenceHeader(_)));

        match AacData::parse(Bytes::from_static(&[0x01, 0x21, 0x00])).unwrap() {
            AacData::Frame { data } => assert_eq!(&data[..], &[0x21, 0x00]),
            other => panic!("unexpected {:?}", other),
        }

        assert!(AacData::parse(Bytes::from_static(&[0x05])).is_err());
        assert!(AacData::parse(Bytes::new()).is_err());
    }
}
