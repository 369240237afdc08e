//! UDP Client

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{NetError, Result};
use crate::net::{self, CallbackSlot};

use super::sender_v4;

struct ClientShared {
    config: Config,
    receiving: AtomicBool,
    on_message: CallbackSlot<dyn Fn(SocketAddrV4, &[u8]) + Send + Sync>,
}

/// UDP client
///
/// `init` creates the socket; `send_to` works from then on. Receiving is
/// opt-in through `start_receiving`, which runs one background thread.
pub struct UdpClient {
    shared: Arc<ClientShared>,

    /// Present between `init` and `close`
    socket: Mutex<Option<Arc<UdpSocket>>>,

    /// Serializes concurrent senders
    send_lock: Mutex<()>,

    receiver: Mutex<Option<JoinHandle<()>>>,
}

impl UdpClient {
    pub fn new(config: Config) -> Self {
        Self {
            shared: Arc::new(ClientShared {
                config,
                receiving: AtomicBool::new(false),
                on_message: CallbackSlot::new(),
            }),
            socket: Mutex::new(None),
            send_lock: Mutex::new(()),
            receiver: Mutex::new(None),
        }
    }

    /// Create the socket, bound to `0.0.0.0:local_port`
    ///
    /// Port 0 lets the OS pick an ephemeral port.
    pub fn init(&self, local_port: u16) -> Result<()> {
        let mut slot = self.socket.lock();
        if slot.is_some() {
            tracing::warn!("UDP client is already initialized");
            return Err(NetError::AlreadyActive("UDP client"));
        }

        let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, local_port);
        let socket = UdpSocket::bind(addr).map_err(|source| {
            tracing::error!("Failed to bind UDP client to {}: {}", addr, source);
            NetError::Bind {
                addr: addr.into(),
                source,
            }
        })?;

        match socket.local_addr() {
            Ok(local) => tracing::info!("UDP client bound to {}", local),
            Err(_) => tracing::info!("UDP client initialized"),
        }

        *slot = Some(Arc::new(socket));
        Ok(())
    }

    /// Send one datagram to `ip:port`
    pub fn send_to(&self, ip: &str, port: u16, bytes: &[u8]) -> Result<()> {
        let socket = self.socket().ok_or_else(|| {
            tracing::warn!("UDP client send before init");
            NetError::NotInitialized
        })?;
        let dest = net::parse_addr(ip, port).map_err(|e| {
            tracing::warn!("Dropping datagram: {}", e);
            e
        })?;

        let _guard = self.send_lock.lock();
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

    /// Launch the background receive loop
    pub fn start_receiving(&self) -> Result<()> {
        let socket = self.socket().ok_or(NetError::NotInitialized)?;

        if self
            .shared
            .receiving
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!("UDP client is already receiving");
            return Err(NetError::AlreadyActive("UDP client receiver"));
        }

        self.reap_receiver();

        if let Err(e) = socket.set_read_timeout(Some(self.shared.config.receive_timeout())) {
            tracing::error!("Failed to set receive timeout: {}", e);
            self.shared.receiving.store(false, Ordering::SeqCst);
            return Err(NetError::SocketCreation(e));
        }

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("netpool-udp-client-recv".to_string())
            .spawn(move || shared.receive_loop(socket));

        match spawned {
            Ok(handle) => {
                *self.receiver.lock() = Some(handle);
                tracing::info!("UDP client started receiving");
                Ok(())
            }
            Err(e) => {
                tracing::error!("Failed to spawn receive thread: {}", e);
                self.shared.receiving.store(false, Ordering::SeqCst);
                Err(NetError::Io(e))
            }
        }
    }

    /// Stop the receive loop and wait for it; idempotent
    pub fn stop_receiving(&self) {
        if !self.shared.receiving.swap(false, Ordering::SeqCst) {
            return;
        }
        self.reap_receiver();
        tracing::info!("UDP client stopped receiving");
    }

    /// Stop receiving and release the socket; idempotent
    pub fn close(&self) {
        self.stop_receiving();
        // Catches a thread whose start raced with stop_receiving.
        self.reap_receiver();

        if self.socket.lock().take().is_some() {
            tracing::info!("UDP client closed");
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.socket.lock().is_some()
    }

    pub fn is_receiving(&self) -> bool {
        self.shared.receiving.load(Ordering::SeqCst)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket().and_then(|s| s.local_addr().ok())
    }

    pub fn set_message_callback<F>(&self, callback: F)
    where
        F: Fn(SocketAddrV4, &[u8]) + Send + Sync + 'static,
    {
        self.shared.on_message.set(Arc::new(callback));
    }

    fn socket(&self) -> Option<Arc<UdpSocket>> {
        self.socket.lock().clone()
    }

    fn reap_receiver(&self) {
        let handle = self.receiver.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                tracing::error!("UDP client receive thread panicked");
            }
        }
    }
}

impl Default for UdpClient {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Drop for UdpClient {
    fn drop(&mut self) {
        self.close();
    }
}

impl ClientShared {
    fn is_receiving(&self) -> bool {
        self.receiving.load(Ordering::SeqCst)
    }

    fn receive_loop(&self, socket: Arc<UdpSocket>) {
        let mut buffer = vec![0u8; self.config.datagram_buffer_size];

        while self.is_receiving() {
            match socket.recv_from(&mut buffer) {
                Ok((n, from)) => {
                    let Some(sender) = sender_v4(from) else {
                        tracing::debug!("Ignoring datagram from non-IPv4 sender {}", from);
                        continue;
                    };
                    tracing::trace!("Received {} bytes from {}", n, sender);
                    if let Some(callback) = self.on_message.get() {
                        callback(sender, &buffer[..n]);
                    }
                }
                Err(ref e) if net::is_timeout(e) || e.kind() == io::ErrorKind::Interrupted => {
                    continue
                }
                Err(e) => {
                    if self.is_receiving() {
                        tracing::warn!("{}", NetError::Receive(e));
                        thread::sleep(self.config.error_backoff());
                    }
                }
            }
        }

        tracing::debug!("UDP client receive loop exited");
    }
}
