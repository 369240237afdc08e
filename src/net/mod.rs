//! Shared socket helpers
//!
//! Address parsing, I/O error classification, lifecycle state and callback
//! storage used by every endpoint.

mod callback;
mod state;

pub(crate) use callback::CallbackSlot;
pub(crate) use state::Lifecycle;
pub use state::RunState;

use std::io;
use std::net::{Ipv4Addr, Shutdown, SocketAddr, SocketAddrV4};

use socket2::{Domain, SockRef, Socket, Type};

use crate::config::Config;
use crate::error::{NetError, Result};

/// Parse a dotted-quad IPv4 string plus port into a socket address
///
/// Hostnames and IPv6 literals are rejected with `InvalidAddress`.
pub fn parse_addr(ip: &str, port: u16) -> Result<SocketAddrV4> {
    let ip: Ipv4Addr = ip
        .trim()
        .parse()
        .map_err(|_| NetError::InvalidAddress(ip.to_string()))?;
    Ok(SocketAddrV4::new(ip, port))
}

/// Create an IPv4 socket of `kind` and bind it to `addr`
///
/// Creation and option failures are `SocketCreation`; the bind itself is
/// `Bind`. Stream sockets still need `listen`.
pub(crate) fn bind_socket(addr: SocketAddrV4, kind: Type, config: &Config) -> Result<Socket> {
    let socket = Socket::new(Domain::IPV4, kind, None).map_err(|e| {
        tracing::error!("Failed to create socket: {}", e);
        NetError::SocketCreation(e)
    })?;

    if config.reuse_address {
        socket.set_reuse_address(true).map_err(|e| {
            tracing::error!("Failed to set SO_REUSEADDR: {}", e);
            NetError::SocketCreation(e)
        })?;
    }

    let target = SocketAddr::V4(addr);
    socket.bind(&target.into()).map_err(|source| {
        tracing::error!("Failed to bind {}: {}", addr, source);
        NetError::Bind {
            addr: target,
            source,
        }
    })?;

    Ok(socket)
}

/// Shut a socket down in both directions, waking any thread blocked in
/// `accept` or `recv_from` on it
///
/// Listening and unconnected datagram sockets may report `NotConnected`
/// while still waking the blocked call, so that error is not logged.
pub(crate) fn interrupt(socket: SockRef<'_>) {
    if let Err(e) = socket.shutdown(Shutdown::Both) {
        if e.kind() != io::ErrorKind::NotConnected {
            tracing::debug!("Socket shutdown failed: {}", e);
        }
    }
}

/// Whether a read error only means "nothing arrived before the timeout"
///
/// Unix reports an expired `SO_RCVTIMEO` as `WouldBlock`, Windows as
/// `TimedOut`.
pub fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// Whether an error means the peer went away rather than a local fault
pub fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}
