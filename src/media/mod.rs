//! Media handling
//!
//! This module provides:
//! - FLV tag parsing, demuxing and writing
//! - H.264/AVC decoder configuration parsing
//! - AAC AudioSpecificConfig parsing
//! - The packet and codec types carried on a stream's feed

pub mod aac;
pub mod flv;
pub mod h264;
pub mod packet;

pub use aac::{AacData, AudioSpecificConfig};
pub use flv::{FlvDemuxer, FlvHeader, FlvTag, FlvTagType};
pub use h264::{AvcConfig, H264Data};
pub use packet::{CodecData, CodecKind, Packet};
