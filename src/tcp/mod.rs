//! TCP Module
//!
//! Connection-oriented endpoints.
//!
//! ## Architecture
//! - Server: single acceptor thread, one pool task per live connection
//! - Client: single receive thread for the one remote peer
//! - One successful read = one delivered message (no framing)

mod client;
mod registry;
mod server;

use std::fmt;

pub use client::TcpClient;
pub use server::{TcpServer, TcpServerHandle};

/// Opaque handle for one live server-side connection
///
/// Allocated from a per-server counter and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for ConnectionId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Point-in-time view of one registered connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub id: ConnectionId,

    /// Peer address formatted as `ip:port`
    pub addr: String,
}
