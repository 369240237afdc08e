//! Configuration for netpool endpoints
//!
//! Centralized configuration with sensible defaults. One `Config` is shared
//! by every endpoint type; each endpoint reads only the fields it needs.

use std::time::Duration;

/// Tunables for pools, servers and clients
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Pool Configuration
    // -------------------------------------------------------------------------
    /// Worker threads owned by each server's pool
    pub worker_threads: usize,

    // -------------------------------------------------------------------------
    // Buffer Configuration
    // -------------------------------------------------------------------------
    /// Bytes requested per stream read (one read = one delivered message)
    pub read_buffer_size: usize,

    /// Bytes reserved for a single datagram
    pub datagram_buffer_size: usize,

    // -------------------------------------------------------------------------
    // Timing Configuration
    // -------------------------------------------------------------------------
    /// Upper bound the UDP client's receive loop stays blocked before
    /// re-checking its flag (milliseconds)
    pub receive_timeout_ms: u64,

    /// Pause after a failed accept or receive before retrying (milliseconds)
    pub error_backoff_ms: u64,

    /// TCP connect timeout (milliseconds)
    pub connect_timeout_ms: u64,

    // -------------------------------------------------------------------------
    // Socket Options
    // -------------------------------------------------------------------------
    /// Disable Nagle's algorithm on stream sockets
    pub nodelay: bool,

    /// Set `SO_REUSEADDR` on server sockets before binding
    pub reuse_address: bool,

    /// Pending connection queue length passed to `listen`
    pub listen_backlog: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_threads: 4,
            read_buffer_size: 4096,
            datagram_buffer_size: 65535,
            receive_timeout_ms: 1000,
            error_backoff_ms: 10,
            connect_timeout_ms: 5000,
            nodelay: true,
            reuse_address: true,
            listen_backlog: 10,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms.max(1))
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.max(1))
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the number of pool workers per server (clamped to at least 1)
    pub fn worker_threads(mut self, count: usize) -> Self {
        self.config.worker_threads = count.max(1);
        self
    }

    /// Set the stream read buffer size (in bytes)
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size.max(1);
        self
    }

    /// Set the datagram buffer size (in bytes)
    pub fn datagram_buffer_size(mut self, size: usize) -> Self {
        self.config.datagram_buffer_size = size.max(1);
        self
    }

    /// Set the receive timeout (in milliseconds)
    pub fn receive_timeout_ms(mut self, ms: u64) -> Self {
        self.config.receive_timeout_ms = ms;
        self
    }

    /// Set the retry pause after accept/receive errors (in milliseconds)
    pub fn error_backoff_ms(mut self, ms: u64) -> Self {
        self.config.error_backoff_ms = ms;
        self
    }

    /// Set the connect timeout (in milliseconds)
    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connect_timeout_ms = ms;
        self
    }

    /// Enable or disable TCP_NODELAY
    pub fn nodelay(mut self, enabled: bool) -> Self {
        self.config.nodelay = enabled;
        self
    }

    /// Enable or disable SO_REUSEADDR on server sockets
    pub fn reuse_address(mut self, enabled: bool) -> Self {
        self.config.reuse_address = enabled;
        self
    }

    /// Set the listen backlog (clamped to at least 1)
    pub fn listen_backlog(mut self, backlog: i32) -> Self {
        self.config.listen_backlog = backlog.max(1);
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
