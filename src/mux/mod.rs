//! Container muxing
//!
//! A relay task owns exactly one [`Muxer`], created from the relay's
//! [`MuxerFactory`]. The call sequence is fixed:
//!
//! ```text
//! initialize(codecs) ──► init_segment(codecs) ──► write_packet(p)*
//! ```
//!
//! `write_packet` buffers internally and only returns bytes once a complete
//! fragment is ready, so fragments do not map one-to-one onto packets.

pub mod flv;
pub mod fragment;

use bytes::Bytes;

use crate::error::MuxError;
use crate::media::{CodecData, Packet};

pub use flv::{FlvMuxer, FlvMuxerFactory};
pub use fragment::FragmentBuffer;

/// Initialization data sent to a sink before any fragment
#[derive(Debug, Clone)]
pub struct InitSegment {
    /// Short textual description of the container and its codecs
    pub metadata: String,
    /// Container header that every fragment depends on
    pub data: Bytes,
}

/// Muxes packets of one stream into container fragments
pub trait Muxer: Send {
    /// Set up tracks for the codec set. Must be called once, before any packet.
    fn initialize(&mut self, codecs: &[CodecData]) -> Result<(), MuxError>;

    /// Metadata and initialization segment for the codec set
    fn init_segment(&self, codecs: &[CodecData]) -> InitSegment;

    /// Add a packet, returning a fragment when one is complete
    fn write_packet(&mut self, packet: &Packet) -> Result<Option<Bytes>, MuxError>;
}

/// Creates a fresh muxer for each relay task
pub trait MuxerFactory: Send + Sync {
    fn create(&self) -> Box<dyn Muxer>;
}

impl<F> MuxerFactory for F
where
    F: Fn() -> Box<dyn Muxer> + Send + Sync,
{
    fn create(&self) -> Box<dyn Muxer> {
        self()
    }
}
