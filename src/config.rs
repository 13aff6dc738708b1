//! Relay configuration
//!
//! Loaded from a JSON file. Every section and field has a default, so an
//! empty object is a valid (if useless) configuration.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Complete configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub relay: RelayConfig,
    pub source: SourceConfig,
    pub logging: LoggingConfig,

    /// Configured streams by id
    pub streams: BTreeMap<String, StreamConfig>,
}

/// Control API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the control API listens on
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::from(([0, 0, 0, 0], 8083)),
        }
    }
}

/// Relay task settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// A task ends when no keyframe arrives for this long
    pub liveness_timeout_secs: u64,

    /// Timeout of one push to a sink (0 = none)
    pub push_timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            liveness_timeout_secs: 10,
            push_timeout_secs: 30,
        }
    }
}

impl RelayConfig {
    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_secs(self.liveness_timeout_secs)
    }

    pub fn push_timeout(&self) -> Option<Duration> {
        (self.push_timeout_secs > 0).then(|| Duration::from_secs(self.push_timeout_secs))
    }
}

/// Upstream source settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Packets buffered per stream before slow readers start losing them
    pub feed_capacity: usize,

    /// How long a relay task waits for the codec set
    pub codec_wait_secs: u64,

    /// An upstream pull stops after this long without subscribers
    pub idle_timeout_secs: u64,

    /// Re-dial the upstream after an error while sinks remain
    pub reconnect: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            feed_capacity: 512,
            codec_wait_secs: 5,
            idle_timeout_secs: 10,
            reconnect: false,
        }
    }
}

impl SourceConfig {
    pub fn codec_wait(&self) -> Duration {
        Duration::from_secs(self.codec_wait_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// One configured stream
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Upstream HTTP-FLV URL. Empty for streams fed in-process.
    #[serde(default)]
    pub url: String,
}

impl Config {
    /// Read and validate a JSON config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    /// Parse and validate a JSON document
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (id, stream) in &self.streams {
            if stream.url.trim().is_empty() {
                return Err(ConfigError::MissingUrl(id.clone()));
            }
        }
        Ok(())
    }

    /// Add a stream pulled from `url`
    pub fn stream(mut self, id: impl Into<String>, url: impl Into<String>) -> Self {
        self.streams
            .insert(id.into(), StreamConfig { url: url.into() });
        self
    }

    /// Add a stream with no upstream, fed through the source hub directly
    pub fn local_stream(mut self, id: impl Into<String>) -> Self {
        self.streams.insert(id.into(), StreamConfig::default());
        self
    }

    /// Set the control API address
    pub fn http_addr(mut self, addr: SocketAddr) -> Self {
        self.server.http_addr = addr;
        self
    }

    /// Set the keyframe liveness timeout (whole seconds)
    pub fn liveness_timeout(mut self, timeout: Duration) -> Self {
        self.relay.liveness_timeout_secs = timeout.as_secs();
        self
    }

    /// Set the per-push timeout (whole seconds, zero disables it)
    pub fn push_timeout(mut self, timeout: Duration) -> Self {
        self.relay.push_timeout_secs = timeout.as_secs();
        self
    }

    /// Set the per-stream feed capacity
    pub fn feed_capacity(mut self, capacity: usize) -> Self {
        self.source.feed_capacity = capacity.max(1);
        self
    }

    /// Set how long tasks wait for codecs
    pub fn codec_wait(mut self, wait: Duration) -> Self {
        self.source.codec_wait_secs = wait.as_secs();
        self
    }

    /// Enable upstream reconnects
    pub fn reconnect(mut self, enabled: bool) -> Self {
        self.source.reconnect = enabled;
        self
    }

    /// Sorted ids of configured streams
    pub fn stream_ids(&self) -> Vec<String> {
        self.streams.keys().cloned().collect()
    }
}
