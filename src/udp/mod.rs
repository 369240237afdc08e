//! UDP Module
//!
//! Connectionless endpoints. No registry: every datagram carries its own
//! sender address, and replies go straight back to that address.
//!
//! ## Architecture
//! - Server: one receive thread, one pool task per datagram
//! - Client: optional receive thread, sending works without it

mod client;
mod server;

pub use client::UdpClient;
pub use server::{UdpServer, UdpServerHandle};

use std::net::{SocketAddr, SocketAddrV4};

/// Narrow a received sender address to IPv4
///
/// Every socket here is bound to an IPv4 address, so a V6 sender only shows
/// up for v4-mapped peers; those are unwrapped.
pub(crate) fn sender_v4(addr: SocketAddr) -> Option<SocketAddrV4> {
    match addr {
        SocketAddr::V4(v4) => Some(v4),
        SocketAddr::V6(v6) => v6
            .ip()
            .to_ipv4_mapped()
            .map(|ip| SocketAddrV4::new(ip, v6.port())),
    }
}
