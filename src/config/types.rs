use std::path::PathBuf;
use std::time::Duration;

use portable_pty::PtySize;
use serde::{Deserialize, Serialize};

use crate::exec::ChunkOptions;
use crate::log::{ReplayMode, ReplayOptions};

/// Root configuration container.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

/// HTTP control surface settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the API server (host:port).
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Directory holding one subdirectory of logs per process.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

/// Tuning for the execution and replay engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Largest chunk read from a child stream in one call (default: 4096).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Stop-request polling interval of stream adapters in ms (default: 50).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Chunks buffered per stream before producers block (default: 64).
    #[serde(default = "default_stream_buffer_capacity")]
    pub stream_buffer_capacity: usize,
    /// Retry delay when a followed log has no new data in ms (default: 100).
    #[serde(default = "default_tail_retry_ms")]
    pub tail_retry_ms: u64,
    /// Pseudo-terminal rows (default: 24).
    #[serde(default = "default_pty_rows")]
    pub pty_rows: u16,
    /// Pseudo-terminal columns (default: 80).
    #[serde(default = "default_pty_cols")]
    pub pty_cols: u16,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8181".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("./log")
}

fn default_chunk_size() -> usize {
    4096
}

fn default_poll_interval_ms() -> u64 {
    50
}

fn default_stream_buffer_capacity() -> usize {
    64
}

fn default_tail_retry_ms() -> u64 {
    100
}

fn default_pty_rows() -> u16 {
    24
}

fn default_pty_cols() -> u16 {
    80
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            log_dir: default_log_dir(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            poll_interval_ms: default_poll_interval_ms(),
            stream_buffer_capacity: default_stream_buffer_capacity(),
            tail_retry_ms: default_tail_retry_ms(),
            pty_rows: default_pty_rows(),
            pty_cols: default_pty_cols(),
        }
    }
}

impl EngineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn tail_retry(&self) -> Duration {
        Duration::from_millis(self.tail_retry_ms)
    }

    pub fn chunk_options(&self) -> ChunkOptions {
        ChunkOptions {
            chunk_size: self.chunk_size,
            poll_interval: self.poll_interval(),
            capacity: self.stream_buffer_capacity,
        }
    }

    pub fn replay_options(&self, mode: ReplayMode) -> ReplayOptions {
        ReplayOptions {
            mode,
            capacity: self.stream_buffer_capacity,
            retry_interval: self.tail_retry(),
        }
    }

    pub fn pty_size(&self) -> PtySize {
        PtySize {
            rows: self.pty_rows,
            cols: self.pty_cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }
}
