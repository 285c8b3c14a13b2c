//! Configuration for HearthKV
//!
//! Centralized configuration with sensible defaults. The two paths have no
//! defaults and must be supplied by the embedding harness.

use std::path::PathBuf;

use crate::error::{HearthError, Result};

/// Main configuration for a HearthKV server instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Directory for the storage engine
    pub db_path: PathBuf,

    /// Engine write buffer size in bytes
    pub write_buffer_size: usize,

    /// Engine open-file ceiling
    pub max_open_files: i32,

    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// Filesystem path for the listening UNIX socket
    pub socket_path: PathBuf,

    /// Worker pool size (0 means one per available CPU)
    pub worker_threads: usize,

    /// Max concurrent client connections
    pub max_connections: usize,

    /// Per-call readiness timeout (milliseconds)
    pub io_timeout_ms: u64,

    /// Maximum accepted key or value length in bytes; longer lengths are a
    /// protocol violation and tear down the connection before allocation
    pub max_payload_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::new(),
            write_buffer_size: 4 << 30, // 4 GiB
            max_open_files: 500,
            socket_path: PathBuf::new(),
            worker_threads: 0,
            max_connections: 1024,
            io_timeout_ms: 5000,
            max_payload_size: 64 << 20, // 64 MiB
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.db_path = path.into();
        self
    }

    pub fn socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.socket_path = path.into();
        self
    }

    pub fn write_buffer_size(mut self, bytes: usize) -> Self {
        self.config.write_buffer_size = bytes;
        self
    }

    pub fn max_open_files(mut self, count: i32) -> Self {
        self.config.max_open_files = count;
        self
    }

    pub fn worker_threads(mut self, count: usize) -> Self {
        self.config.worker_threads = count;
        self
    }

    pub fn max_connections(mut self, count: usize) -> Self {
        self.config.max_connections = count;
        self
    }

    pub fn io_timeout_ms(mut self, ms: u64) -> Self {
        self.config.io_timeout_ms = ms;
        self
    }

    pub fn max_payload_size(mut self, bytes: usize) -> Self {
        self.config.max_payload_size = bytes;
        self
    }

    /// Validate and produce the config
    ///
    /// Fails when either required path is missing.
    pub fn build(self) -> Result<Config> {
        if self.config.db_path.as_os_str().is_empty() {
            return Err(HearthError::Config("db_path is required".to_string()));
        }
        if self.config.socket_path.as_os_str().is_empty() {
            return Err(HearthError::Config("socket_path is required".to_string()));
        }
        Ok(self.config)
    }
}
