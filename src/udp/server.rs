//! UDP Server
//!
//! One receive thread hands every datagram to the worker pool.

use std::io;
use std::net::{SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use parking_lot::Mutex;
use socket2::{SockRef, Type};

use crate::config::Config;
use crate::error::{NetError, Result};
use crate::net::{self, CallbackSlot, Lifecycle, RunState};
use crate::pool::WorkerPool;

use super::sender_v4;

struct ServerShared {
    config: Config,
    lifecycle: Lifecycle,

    /// Present while running; shared with the receive loop and shut down
    /// by `stop` to wake it
    socket: Mutex<Option<Arc<UdpSocket>>>,

    on_message: CallbackSlot<dyn Fn(SocketAddrV4, &[u8]) + Send + Sync>,
}

/// UDP server dispatching datagrams onto a worker pool
///
/// Datagrams from different senders (or the same sender) may be processed
/// concurrently and complete in any order.
pub struct UdpServer {
    ip: String,
    port: u16,
    shared: Arc<ServerShared>,
    pool: Arc<WorkerPool>,
    receive_thread: Mutex<Option<JoinHandle<()>>>,
}

impl UdpServer {
    /// Create a stopped server for `ip:port`
    pub fn new(ip: impl Into<String>, port: u16, config: Config) -> Result<Self> {
        let pool = WorkerPool::new(config.worker_threads)?;
        Ok(Self {
            ip: ip.into(),
            port,
            shared: Arc::new(ServerShared {
                config,
                lifecycle: Lifecycle::new(),
                socket: Mutex::new(None),
                on_message: CallbackSlot::new(),
            }),
            pool: Arc::new(pool),
            receive_thread: Mutex::new(None),
        })
    }

    /// Bind the socket and launch the receive loop
    pub fn start(&self) -> Result<()> {
        if !self
            .shared
            .lifecycle
            .transition(RunState::Stopped, RunState::Starting)
        {
            tracing::warn!("UDP server on {}:{} is already running", self.ip, self.port);
            return Err(NetError::AlreadyActive("UDP server"));
        }

        let socket = match self.open_socket() {
            Ok(socket) => Arc::new(socket),
            Err(e) => {
                self.shared.lifecycle.set(RunState::Stopped);
                return Err(e);
            }
        };

        *self.shared.socket.lock() = Some(Arc::clone(&socket));
        self.shared.lifecycle.set(RunState::Running);

        let shared = Arc::clone(&self.shared);
        let pool = Arc::clone(&self.pool);
        let spawned = thread::Builder::new()
            .name("netpool-udp-recv".to_string())
            .spawn(move || receive_loop(shared, pool, socket));

        match spawned {
            Ok(handle) => {
                *self.receive_thread.lock() = Some(handle);
                tracing::info!(
                    "UDP server listening on {}",
                    self.local_addr().map(|a| a.to_string()).unwrap_or_default()
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!("Failed to spawn receive thread: {}", e);
                self.shared.socket.lock().take();
                self.shared.lifecycle.set(RunState::Stopped);
                Err(NetError::Io(e))
            }
        }
    }

    fn open_socket(&self) -> Result<UdpSocket> {
        let addr = net::parse_addr(&self.ip, self.port).map_err(|e| {
            tracing::error!("Refusing to start UDP server: {}", e);
            e
        })?;

        let socket = net::bind_socket(addr, Type::DGRAM, &self.shared.config)?;
        Ok(UdpSocket::from(socket))
    }

    /// Stop the receive loop and release the socket; idempotent
    ///
    /// Datagrams already handed to the pool are still processed.
    pub fn stop(&self) {
        if !self
            .shared
            .lifecycle
            .transition(RunState::Running, RunState::Stopping)
        {
            return;
        }

        // Wakes the receive thread out of its blocking call.
        if let Some(socket) = self.shared.socket.lock().take() {
            net::interrupt(SockRef::from(&*socket));
        }

        if let Some(handle) = self.receive_thread.lock().take() {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                tracing::error!("UDP receive thread panicked");
            }
        }

        self.shared.lifecycle.set(RunState::Stopped);
        tracing::info!("UDP server stopped");
    }

    /// Send one datagram to `ip:port`
    pub fn send_to(&self, ip: &str, port: u16, bytes: &[u8]) -> Result<()> {
        self.shared.send_to(ip, port, bytes)
    }

    pub fn is_running(&self) -> bool {
        self.shared.lifecycle.is_running()
    }

    pub fn state(&self) -> RunState {
        self.shared.lifecycle.get()
    }

    /// Bound address while running (resolves port 0)
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared
            .socket
            .lock()
            .as_ref()
            .and_then(|s| s.local_addr().ok())
    }

    /// Weak handle for use inside callbacks
    pub fn handle(&self) -> UdpServerHandle {
        UdpServerHandle {
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn set_message_callback<F>(&self, callback: F)
    where
        F: Fn(SocketAddrV4, &[u8]) + Send + Sync + 'static,
    {
        self.shared.on_message.set(Arc::new(callback));
    }
}

impl Drop for UdpServer {
    fn drop(&mut self) {
        self.stop();
        self.pool.shutdown();
    }
}

/// Cloneable, non-owning handle to a `UdpServer`
#[derive(Clone)]
pub struct UdpServerHandle {
    shared: Weak<ServerShared>,
}

impl UdpServerHandle {
    pub fn send_to(&self, ip: &str, port: u16, bytes: &[u8]) -> Result<()> {
        self.shared
            .upgrade()
            .ok_or(NetError::NotRunning)?
            .send_to(ip, port, bytes)
    }

    /// Reply to the sender of a received datagram
    pub fn reply(&self, to: SocketAddrV4, bytes: &[u8]) -> Result<()> {
        self.send_to(&to.ip().to_string(), to.port(), bytes)
    }
}

impl ServerShared {
    fn send_to(&self, ip: &str, port: u16, bytes: &[u8]) -> Result<()> {
        if !self.lifecycle.is_running() {
            return Err(NetError::NotRunning);
        }
        let socket = self.socket.lock().clone().ok_or(NetError::NotRunning)?;
        let dest = net::parse_addr(ip, port).map_err(|e| {
            tracing::warn!("Dropping datagram: {}", e);
            e
        })?;

        let sent = socket.send_to(bytes, dest).map_err(|e| {
            tracing::warn!("Send to {} failed: {}", dest, e);
            NetError::Send(e)
        })?;
        if sent != bytes.len() {
            tracing::warn!("Short send to {}: {}/{} bytes", dest, sent, bytes.len());
            return Err(NetError::Send(io::Error::new(
                io::ErrorKind::WriteZero,
                "datagram truncated on send",
            )));
        }

        tracing::trace!("Sent {} bytes to {}", sent, dest);
        Ok(())
    }

    /// Pool task: hand one datagram to the message callback
    fn dispatch(&self, sender: SocketAddrV4, payload: Bytes) {
        if let Some(callback) = self.on_message.get() {
            callback(sender, &payload);
        }
    }
}

/// Receive thread body; exits once the server leaves `Running`
fn receive_loop(shared: Arc<ServerShared>, pool: Arc<WorkerPool>, socket: Arc<UdpSocket>) {
    let mut buffer = vec![0u8; shared.config.datagram_buffer_size];

    while shared.lifecycle.is_running() {
        let received = socket.recv_from(&mut buffer);
        // Whatever a shutdown socket hands back is not a datagram.
        if !shared.lifecycle.is_running() {
            break;
        }

        let (n, from) = match received {
            Ok(received) => received,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::warn!("{}", NetError::Receive(e));
                thread::sleep(shared.config.error_backoff());
                continue;
            }
        };

        let Some(sender) = sender_v4(from) else {
            tracing::debug!("Ignoring datagram from non-IPv4 sender {}", from);
            continue;
        };
        tracing::trace!("Received {} bytes from {}", n, sender);

        let payload = Bytes::copy_from_slice(&buffer[..n]);
        let task_shared = Arc::clone(&shared);
        if let Err(e) = pool.execute(move || task_shared.dispatch(sender, payload)) {
            tracing::error!("Dropping datagram from {}: {}", sender, e);
        }
    }

    tracing::debug!("UDP receive loop exited");
}
