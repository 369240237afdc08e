//! Error types for netpool
//!
//! Provides a unified error type for the pool and every endpoint.

use std::net::SocketAddr;

use thiserror::Error;

use crate::tcp::ConnectionId;

/// Result type alias using NetError
pub type Result<T> = std::result::Result<T, NetError>;

/// Unified error type for netpool operations
#[derive(Debug, Error)]
pub enum NetError {
    // -------------------------------------------------------------------------
    // Socket Setup Errors
    // -------------------------------------------------------------------------
    #[error("Failed to create socket: {0}")]
    SocketCreation(#[source] std::io::Error),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to listen: {0}")]
    Listen(#[source] std::io::Error),

    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid IPv4 address: {0}")]
    InvalidAddress(String),

    // -------------------------------------------------------------------------
    // Transfer Errors
    // -------------------------------------------------------------------------
    #[error("Send failed: {0}")]
    Send(#[source] std::io::Error),

    #[error("Receive failed: {0}")]
    Receive(#[source] std::io::Error),

    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("{0} is already active")]
    AlreadyActive(&'static str),

    #[error("Not connected")]
    NotConnected,

    #[error("Socket not initialized")]
    NotInitialized,

    #[error("Server is not running")]
    NotRunning,

    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    // -------------------------------------------------------------------------
    // Pool Errors
    // -------------------------------------------------------------------------
    #[error("Cannot submit task: worker pool is shut down")]
    PoolClosed,

    #[error("Task panicked: {0}")]
    TaskPanicked(String),

    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
