//! Error types
//!
//! Each layer has its own error enum; [`Error`] collects them for callers
//! that only care that something failed.

use std::time::Duration;

use thiserror::Error;

/// Crate-level result alias
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Mux(#[from] MuxError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Bitstream parsing errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    #[error("invalid FLV header")]
    InvalidFlvHeader,

    #[error("invalid AVC packet")]
    InvalidAvcPacket,

    #[error("invalid AAC packet")]
    InvalidAacPacket,
}

/// Muxer errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MuxError {
    #[error("no tracks to mux")]
    NoTracks,

    #[error("codec {codec} on track {track} is not supported")]
    UnsupportedCodec { track: usize, codec: String },

    #[error("muxer used before initialize")]
    NotInitialized,

    #[error("muxer already initialized")]
    AlreadyInitialized,

    #[error("packet for unknown track {0}")]
    UnknownTrack(usize),
}

/// Outbound push errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Used by non-HTTP transports
    #[error("send to {url} failed: {reason}")]
    Other { url: String, reason: String },
}

/// Upstream pull errors
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("upstream {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("upstream {url} answered {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("upstream {url} sent bad media: {source}")]
    Media {
        url: String,
        #[source]
        source: MediaError,
    },
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("stream {0} has no URL")]
    MissingUrl(String),
}

/// Relay errors
///
/// `UnknownStream` and `MalformedRequest` surface through the control API.
/// Every other variant ends a single relay task and is only logged.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("stream {0} does not exist")]
    UnknownStream(String),

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("codecs unavailable for stream {0}")]
    CodecsUnavailable(String),

    #[error("muxer initialization failed: {0}")]
    MuxerInit(#[source] MuxError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("no keyframe within {0:?}")]
    LivenessTimeout(Duration),

    #[error("sink detached")]
    Detached,

    #[error("source feed closed")]
    SourceClosed,
}
