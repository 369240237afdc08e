//! # netpool
//!
//! A small threaded networking runtime with:
//! - A fixed-size worker pool with result handles and draining shutdown
//! - Multi-client TCP server with a live connection registry
//! - TCP client with a background receive loop
//! - UDP server and client
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────┐        ┌──────────────────────────┐
//! │        TcpServer         │        │        UdpServer         │
//! │  accept thread           │        │  receive thread          │
//! │  ConnectionRegistry      │        │  (no per-sender state)   │
//! └────────────┬─────────────┘        └────────────┬─────────────┘
//!              │ one task per connection           │ one task per datagram
//!              ▼                                   ▼
//!       ┌─────────────┐                     ┌─────────────┐
//!       │ WorkerPool  │                     │ WorkerPool  │
//!       │ (N workers) │                     │ (N workers) │
//!       └──────┬──────┘                     └──────┬──────┘
//!              ▼                                   ▼
//!        user callbacks                      user callbacks
//!
//! TcpClient / UdpClient: one dedicated receive thread each, no pool.
//! ```
//!
//! Payloads are raw bytes. One successful read or receive is delivered as
//! one message; no framing is added on top of the transport.

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod net;
pub mod pool;
pub mod tcp;
pub mod udp;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{NetError, Result};
pub use config::Config;
pub use net::RunState;
pub use pool::{TaskHandle, WorkerPool};
pub use tcp::{ClientInfo, ConnectionId, TcpClient, TcpServer, TcpServerHandle};
pub use udp::{UdpClient, UdpServer, UdpServerHandle};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of netpool
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
