//! Node configuration.
//!
//! Defaults are tuned for a handful of long-lived peer connections. Values can
//! be loaded from a TOML file and overridden from the command line.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WireError};

/// Default listen port for node-to-node traffic
pub const DEFAULT_PORT: u16 = 47100;

/// Upper bound for a single length-prefixed field (16MB)
pub const DEFAULT_MAX_ARRAY_LEN: usize = 16 * 1024 * 1024;

/// Per-connection read buffer (64KB)
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Limits enforced by the message reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderLimits {
    /// Longest byte array or string accepted from a peer.
    pub max_array_len: usize,
}

impl Default for ReaderLimits {
    fn default() -> Self {
        Self {
            max_array_len: DEFAULT_MAX_ARRAY_LEN,
        }
    }
}

/// Node configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Address the acceptor listens on
    pub bind_addr: SocketAddr,
    /// Number of worker event loops
    pub workers: usize,
    /// Read buffer per connection
    pub read_buffer_size: usize,
    /// SO_RCVBUF for accepted sockets (unix only)
    pub socket_recv_buffer: Option<usize>,
    /// Connections above this are rejected at accept
    pub max_connections: usize,
    /// Poll timeout for event loops
    pub poll_timeout_ms: u64,
    /// Interval between stats log lines, 0 disables
    pub stats_interval_secs: u64,
    /// Longest length-prefixed field accepted
    pub max_array_len: usize,
    /// Fallback tracing filter when RUST_LOG is unset
    pub log_filter: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            workers: 2,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            socket_recv_buffer: None,
            max_connections: 1024,
            poll_timeout_ms: 100,
            stats_interval_secs: 5,
            max_array_len: DEFAULT_MAX_ARRAY_LEN,
            log_filter: "info".to_string(),
        }
    }
}

impl NodeConfig {
    /// Parse a TOML document; missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| WireError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| WireError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(WireError::Config("workers must be at least 1".into()));
        }
        if self.read_buffer_size == 0 {
            return Err(WireError::Config("read_buffer_size must be non-zero".into()));
        }
        if self.max_array_len == 0 {
            return Err(WireError::Config("max_array_len must be non-zero".into()));
        }
        if self.max_connections == 0 {
            return Err(WireError::Config("max_connections must be non-zero".into()));
        }
        Ok(())
    }

    pub fn reader_limits(&self) -> ReaderLimits {
        ReaderLimits {
            max_array_len: self.max_array_len,
        }
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn stats_interval(&self) -> Option<Duration> {
        match self.stats_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}
