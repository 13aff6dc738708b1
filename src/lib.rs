//! Live media relay
//!
//! Pulls live streams from upstream sources and pushes them, repackaged as
//! FLV fragments, to any number of HTTP sinks. Sinks are attached and
//! detached at runtime through a small HTTP control API.
//!
//! ```text
//!                 POST /api/streams/{id}/connect
//!                               │
//!                               ▼
//!   upstream ──► SourceHub ──► Relay ──► RelayTask ──► Muxer ──► Transport ──► sink
//!   (HTTP-FLV)   (broadcast)   (registry)  (one per sink)  (FLV)     (HTTP POST)
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod media;
pub mod mux;
pub mod registry;
pub mod relay;
pub mod source;
pub mod stats;
pub mod transport;

pub use config::Config;
pub use error::{Error, Result};
pub use registry::ConnectionRegistry;
pub use relay::Relay;
