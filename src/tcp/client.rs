//! TCP Client
//!
//! One connection, one receive thread.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{NetError, Result};
use crate::net::{self, CallbackSlot};

/// One established connection
///
/// `open` flips to false exactly once, either by `disconnect` or by the
/// receive loop noticing the peer went away. Whoever flips it reports it.
struct Session {
    stream: TcpStream,
    peer: SocketAddr,
    open: AtomicBool,
}

impl Session {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Claim the close; true for exactly one caller
    fn claim_close(&self) -> bool {
        self.open.swap(false, Ordering::SeqCst)
    }

    fn shutdown(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

struct ClientShared {
    config: Config,
    session: Mutex<Option<Arc<Session>>>,

    /// Serializes concurrent senders
    send_lock: Mutex<()>,

    on_message: CallbackSlot<dyn Fn(&[u8]) + Send + Sync>,
    on_connection: CallbackSlot<dyn Fn(bool) + Send + Sync>,
}

/// TCP client with a background receive loop
///
/// The connection callback fires `true` after a successful `connect` and
/// `false` exactly once when that connection ends, whether the close came
/// from `disconnect` or from the peer.
pub struct TcpClient {
    shared: Arc<ClientShared>,

    /// Serializes `connect` calls
    connect_lock: Mutex<()>,

    receiver: Mutex<Option<JoinHandle<()>>>,
}

impl TcpClient {
    pub fn new(config: Config) -> Self {
        Self {
            shared: Arc::new(ClientShared {
                config,
                session: Mutex::new(None),
                send_lock: Mutex::new(()),
                on_message: CallbackSlot::new(),
                on_connection: CallbackSlot::new(),
            }),
            connect_lock: Mutex::new(()),
            receiver: Mutex::new(None),
        }
    }

    /// Connect to `ip:port` and start the receive loop
    ///
    /// Returns `NotConnected` if the connection callback disconnects before
    /// the receive loop starts.
    pub fn connect(&self, ip: &str, port: u16) -> Result<()> {
        let _guard = self.connect_lock.lock();

        if self.is_connected() {
            tracing::warn!("TCP client is already connected");
            return Err(NetError::AlreadyActive("TCP client"));
        }

        // A previous connection closed by the peer leaves its thread behind.
        self.reap_receiver();

        let addr: SocketAddr = net::parse_addr(ip, port)
            .map_err(|e| {
                tracing::error!("Refusing to connect: {}", e);
                e
            })?
            .into();

        let stream = TcpStream::connect_timeout(&addr, self.shared.config.connect_timeout())
            .map_err(|source| {
                tracing::error!("Failed to connect to {}: {}", addr, source);
                NetError::Connect { addr, source }
            })?;

        if self.shared.config.nodelay {
            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!("Failed to set TCP_NODELAY: {}", e);
            }
        }

        let session = Arc::new(Session {
            stream,
            peer: addr,
            open: AtomicBool::new(true),
        });
        *self.shared.session.lock() = Some(Arc::clone(&session));

        tracing::info!("Connected to {}", addr);
        if let Some(callback) = self.shared.on_connection.get() {
            callback(true);
        }

        // The callback (or another thread) may already have disconnected;
        // `false` has then been reported and there is nothing to receive.
        if !session.is_open() {
            tracing::debug!("Connection to {} closed during connect", addr);
            return Err(NetError::NotConnected);
        }

        let shared = Arc::clone(&self.shared);
        let loop_session = Arc::clone(&session);
        let spawned = thread::Builder::new()
            .name("netpool-tcp-client-recv".to_string())
            .spawn(move || shared.receive_loop(loop_session));

        match spawned {
            Ok(handle) => {
                *self.receiver.lock() = Some(handle);
                Ok(())
            }
            Err(e) => {
                tracing::error!("Failed to spawn receive thread: {}", e);
                self.shared.end_session(&session);
                Err(NetError::Io(e))
            }
        }
    }

    /// Close the connection and join the receive loop
    ///
    /// Idempotent; a no-op when the peer already closed the connection.
    pub fn disconnect(&self) {
        let session = match self.shared.session.lock().take() {
            Some(session) => session,
            None => return,
        };
        if !session.claim_close() {
            return;
        }

        session.shutdown();
        self.reap_receiver();

        tracing::info!("Disconnected from {}", session.peer);
        if let Some(callback) = self.shared.on_connection.get() {
            callback(false);
        }
    }

    /// Send the whole payload to the server
    pub fn send(&self, bytes: &[u8]) -> Result<()> {
        let session = self.shared.current().ok_or(NetError::NotConnected)?;

        let _guard = self.shared.send_lock.lock();
        (&session.stream)
            .write_all(bytes)
            .and_then(|()| (&session.stream).flush())
            .map_err(|e| {
                tracing::warn!("Send to {} failed: {}", session.peer, e);
                NetError::Send(e)
            })?;

        tracing::trace!("Sent {} bytes to {}", bytes.len(), session.peer);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.shared.current().is_some()
    }

    /// Remote address of the current connection
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.shared.current().map(|s| s.peer)
    }

    pub fn set_message_callback<F>(&self, callback: F)
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.shared.on_message.set(Arc::new(callback));
    }

    pub fn set_connection_callback<F>(&self, callback: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.shared.on_connection.set(Arc::new(callback));
    }

    /// Join the receive thread unless we are running on it
    fn reap_receiver(&self) {
        let handle = self.receiver.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                tracing::error!("TCP client receive thread panicked");
            }
        }
    }
}

impl Default for TcpClient {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Drop for TcpClient {
    fn drop(&mut self) {
        self.disconnect();
        self.reap_receiver();
    }
}

impl ClientShared {
    fn current(&self) -> Option<Arc<Session>> {
        self.session
            .lock()
            .as_ref()
            .filter(|s| s.is_open())
            .cloned()
    }

    /// Report a close not initiated by `disconnect`
    fn end_session(&self, session: &Arc<Session>) {
        if !session.claim_close() {
            return;
        }

        {
            let mut slot = self.session.lock();
            if slot.as_ref().is_some_and(|s| Arc::ptr_eq(s, session)) {
                *slot = None;
            }
        }
        session.shutdown();

        tracing::info!("Connection to {} closed", session.peer);
        if let Some(callback) = self.on_connection.get() {
            callback(false);
        }
    }

    fn receive_loop(&self, session: Arc<Session>) {
        let mut reader = &session.stream;
        let mut buffer = vec![0u8; self.config.read_buffer_size];

        while session.is_open() {
            match reader.read(&mut buffer) {
                Ok(0) => {
                    if session.is_open() {
                        tracing::debug!("Server {} closed the connection", session.peer);
                    }
                    break;
                }
                Ok(n) => {
                    tracing::trace!("Received {} bytes from {}", n, session.peer);
                    if let Some(callback) = self.on_message.get() {
                        callback(&buffer[..n]);
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    if session.is_open() && !net::is_disconnect(&e) {
                        tracing::warn!("{}", NetError::Receive(e));
                    }
                    break;
                }
            }
        }

        self.end_session(&session);
    }
}
