//! Server configuration.
//!
//! A [`ServerConfig`] names the bind address, the published root, the
//! staging area, the I/O strategy, and the tuning knobs of the transfer
//! engine. It can be built in code or loaded from a TOML file.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default TCP port.
pub const DEFAULT_PORT: u16 = 8001;

/// Default chunk size for file transfers (8 KB).
pub const DEFAULT_CHUNK_SIZE: u32 = 8192;

/// Listen backlog.
pub const DEFAULT_BACKLOG: i32 = 5;

/// Memory staging threshold for the hybrid storage mode (10 KiB).
pub const HYBRID_MEMORY_THRESHOLD: u64 = 10 * 1024;

/// Default memory budget for memory-first staging (100 MiB).
pub const DEFAULT_MAX_MEMORY_BYTES: u64 = 100 * 1024 * 1024;

/// Default idle timeout before a session is reaped (30 minutes).
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Default interval between reaper sweeps (5 minutes).
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// I/O strategy of the server dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// One connection at a time, sequential read-handle-write loop
    Blocking,
    /// One worker thread per accepted connection
    Threaded,
    /// One thread multiplexing all sockets via readiness polling
    Readiness,
    /// All connections multiplexed by a single cooperative reactor
    Async,
}

impl FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "blocking" => Ok(Self::Blocking),
            "threaded" => Ok(Self::Threaded),
            "readiness" => Ok(Self::Readiness),
            "async" => Ok(Self::Async),
            other => Err(Error::Config(format!(
                "unknown strategy '{other}' (expected blocking, threaded, readiness, or async)"
            ))),
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Blocking => "blocking",
            Self::Threaded => "threaded",
            Self::Readiness => "readiness",
            Self::Async => "async",
        };
        f.write_str(name)
    }
}

/// Staging placement for in-progress transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    /// Stage in memory while the memory budget allows, else fall back to disk
    MemoryFirst,
    /// Always stage to a temp file
    DiskFirst,
    /// Memory for small files (≤ 10 KiB declared), disk otherwise
    Hybrid,
}

impl Default for StorageMode {
    fn default() -> Self {
        Self::Hybrid
    }
}

/// Configuration of one file server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind; 0 lets the OS choose
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory of published files, the namespace visible to peers
    pub root_dir: PathBuf,
    /// Staging area; each session gets its own subdirectory
    pub temp_dir: PathBuf,
    /// Dispatcher I/O strategy
    #[serde(default = "default_strategy")]
    pub strategy: Strategy,
    /// Chunk size for transfers
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u32,
    /// Staging placement
    #[serde(default)]
    pub storage_mode: StorageMode,
    /// Memory budget for memory-first staging
    #[serde(default = "default_max_memory")]
    pub max_memory_bytes: u64,
    /// Seconds of inactivity before a session is reaped
    #[serde(default = "default_idle_secs")]
    pub idle_timeout_secs: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_port() -> u16 {
    DEFAULT_PORT
}

const fn default_strategy() -> Strategy {
    Strategy::Threaded
}

const fn default_chunk_size() -> u32 {
    DEFAULT_CHUNK_SIZE
}

const fn default_max_memory() -> u64 {
    DEFAULT_MAX_MEMORY_BYTES
}

const fn default_idle_secs() -> u64 {
    DEFAULT_IDLE_TIMEOUT.as_secs()
}

impl ServerConfig {
    /// Create a configuration with default tuning for the given directories.
    #[must_use]
    pub fn new(root_dir: impl Into<PathBuf>, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            host: default_host(),
            port: DEFAULT_PORT,
            root_dir: root_dir.into(),
            temp_dir: temp_dir.into(),
            strategy: default_strategy(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            storage_mode: StorageMode::default(),
            max_memory_bytes: DEFAULT_MAX_MEMORY_BYTES,
            idle_timeout_secs: default_idle_secs(),
        }
    }

    /// Load a configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        let config: Self =
            toml::from_str(&raw).map_err(|e| Error::Config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check internal consistency.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk_size must be non-zero".to_string()));
        }
        if self.root_dir.as_os_str().is_empty() {
            return Err(Error::Config("root_dir must be set".to_string()));
        }
        if self.temp_dir.as_os_str().is_empty() {
            return Err(Error::Config("temp_dir must be set".to_string()));
        }
        Ok(())
    }

    /// Idle timeout as a [`Duration`].
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}
