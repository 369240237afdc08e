//! TCP Server
//!
//! Accepts connections on a dedicated thread and hands each one to the
//! worker pool, where a receive task reads until the peer goes away.

use std::io::{self, Read};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use socket2::{SockRef, Type};

use crate::config::Config;
use crate::error::{NetError, Result};
use crate::net::{self, CallbackSlot, Lifecycle, RunState};
use crate::pool::WorkerPool;

use super::registry::{Connection, ConnectionRegistry};
use super::{ClientInfo, ConnectionId};

/// State shared by the owner, the accept thread and every receive task
struct ServerShared {
    config: Config,
    lifecycle: Lifecycle,
    registry: ConnectionRegistry,

    /// Address actually bound by the last successful `start`
    local_addr: Mutex<Option<SocketAddr>>,

    /// Present while running; `stop` shuts it down to wake `accept`
    listener: Mutex<Option<Arc<TcpListener>>>,

    on_message: CallbackSlot<dyn Fn(ConnectionId, &[u8]) + Send + Sync>,
    on_connect: CallbackSlot<dyn Fn(ConnectionId, &str) + Send + Sync>,
    on_disconnect: CallbackSlot<dyn Fn(ConnectionId) + Send + Sync>,
}

/// Multi-client TCP server
///
/// ## Threads
/// - one accept thread, blocked in `accept` until a client arrives or
///   `stop` shuts the listener down
/// - `worker_threads` pool workers; each live connection occupies one worker
///   for its whole lifetime, so connections beyond the worker count wait in
///   the queue until a worker frees up
///
/// Callbacks run on the accept thread (connect) or a pool worker (message,
/// disconnect) with no internal lock held.
pub struct TcpServer {
    ip: String,
    port: u16,
    shared: Arc<ServerShared>,
    pool: Arc<WorkerPool>,
    accept_thread: Mutex<Option<JoinHandle<()>>>,
}

impl TcpServer {
    /// Create a stopped server for `ip:port`
    ///
    /// Spawns the worker pool immediately; sockets are only created by
    /// `start`.
    pub fn new(ip: impl Into<String>, port: u16, config: Config) -> Result<Self> {
        let pool = WorkerPool::new(config.worker_threads)?;
        Ok(Self {
            ip: ip.into(),
            port,
            shared: Arc::new(ServerShared {
                config,
                lifecycle: Lifecycle::new(),
                registry: ConnectionRegistry::new(),
                local_addr: Mutex::new(None),
                listener: Mutex::new(None),
                on_message: CallbackSlot::new(),
                on_connect: CallbackSlot::new(),
                on_disconnect: CallbackSlot::new(),
            }),
            pool: Arc::new(pool),
            accept_thread: Mutex::new(None),
        })
    }

    /// Bind, listen and launch the accept loop
    pub fn start(&self) -> Result<()> {
        if !self
            .shared
            .lifecycle
            .transition(RunState::Stopped, RunState::Starting)
        {
            tracing::warn!("TCP server on {}:{} is already running", self.ip, self.port);
            return Err(NetError::AlreadyActive("TCP server"));
        }

        match self.open_listener() {
            Ok(listener) => self.launch(listener),
            Err(e) => {
                self.shared.lifecycle.set(RunState::Stopped);
                Err(e)
            }
        }
    }

    fn open_listener(&self) -> Result<TcpListener> {
        let addr = net::parse_addr(&self.ip, self.port).map_err(|e| {
            tracing::error!("Refusing to start TCP server: {}", e);
            e
        })?;

        let socket = net::bind_socket(addr, Type::STREAM, &self.shared.config)?;
        socket.listen(self.shared.config.listen_backlog).map_err(|e| {
            tracing::error!("Failed to listen on {}: {}", addr, e);
            NetError::Listen(e)
        })?;

        let listener = TcpListener::from(socket);
        let local = listener.local_addr().map_err(|e| {
            tracing::error!("Listener on {} has no local address: {}", addr, e);
            NetError::Listen(e)
        })?;

        *self.shared.local_addr.lock() = Some(local);
        Ok(listener)
    }

    fn launch(&self, listener: TcpListener) -> Result<()> {
        let listener = Arc::new(listener);
        *self.shared.listener.lock() = Some(Arc::clone(&listener));
        self.shared.lifecycle.set(RunState::Running);

        let shared = Arc::clone(&self.shared);
        let pool = Arc::clone(&self.pool);
        let spawned = thread::Builder::new()
            .name("netpool-tcp-accept".to_string())
            .spawn(move || accept_loop(shared, pool, listener));

        match spawned {
            Ok(handle) => {
                *self.accept_thread.lock() = Some(handle);
                tracing::info!(
                    "TCP server listening on {}",
                    self.local_addr().map(|a| a.to_string()).unwrap_or_default()
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!("Failed to spawn accept thread: {}", e);
                self.shared.listener.lock().take();
                self.shared.lifecycle.set(RunState::Stopped);
                Err(NetError::Io(e))
            }
        }
    }

    /// Stop accepting, then close and forget every live connection
    ///
    /// Idempotent. Receive tasks wake on the socket shutdown, fire their
    /// disconnect callbacks and return their workers to the pool.
    pub fn stop(&self) {
        if !self
            .shared
            .lifecycle
            .transition(RunState::Running, RunState::Stopping)
        {
            return;
        }

        // Wakes the accept thread out of its blocking call.
        if let Some(listener) = self.shared.listener.lock().take() {
            net::interrupt(SockRef::from(&*listener));
        }

        if let Some(handle) = self.accept_thread.lock().take() {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                tracing::error!("Accept thread panicked");
            }
        }

        let closed = self.shared.registry.drain();
        for connection in &closed {
            connection.close();
        }

        self.shared.lifecycle.set(RunState::Stopped);
        tracing::info!("TCP server stopped ({} connections closed)", closed.len());
    }

    /// Send to one connection
    pub fn send_to(&self, id: ConnectionId, bytes: &[u8]) -> Result<()> {
        self.shared.send_to(id, bytes)
    }

    /// Best-effort send to every connection; returns how many were reached
    pub fn broadcast(&self, bytes: &[u8]) -> Result<usize> {
        self.shared.broadcast(bytes)
    }

    /// Forcibly close one connection
    ///
    /// The connection leaves the registry at once; its receive task then
    /// fires the disconnect callback.
    pub fn close_client(&self, id: ConnectionId) -> Result<()> {
        self.shared.close_client(id)
    }

    /// Point-in-time copy of the registry, sorted by id
    pub fn clients(&self) -> Vec<ClientInfo> {
        self.shared.registry.clients()
    }

    pub fn client_count(&self) -> usize {
        self.shared.registry.len()
    }

    pub fn is_running(&self) -> bool {
        self.shared.lifecycle.is_running()
    }

    pub fn state(&self) -> RunState {
        self.shared.lifecycle.get()
    }

    /// Address bound by the last successful `start` (resolves port 0)
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.shared.local_addr.lock()
    }

    /// Weak handle for use inside callbacks
    pub fn handle(&self) -> TcpServerHandle {
        TcpServerHandle {
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn set_message_callback<F>(&self, callback: F)
    where
        F: Fn(ConnectionId, &[u8]) + Send + Sync + 'static,
    {
        self.shared.on_message.set(Arc::new(callback));
    }

    pub fn set_connection_callback<F>(&self, callback: F)
    where
        F: Fn(ConnectionId, &str) + Send + Sync + 'static,
    {
        self.shared.on_connect.set(Arc::new(callback));
    }

    pub fn set_disconnect_callback<F>(&self, callback: F)
    where
        F: Fn(ConnectionId) + Send + Sync + 'static,
    {
        self.shared.on_disconnect.set(Arc::new(callback));
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        self.stop();
        self.pool.shutdown();
    }
}

/// Cloneable, non-owning handle to a `TcpServer`
///
/// Capturing this in a callback does not keep the server alive. Every
/// operation fails with `NotRunning` once the server has been dropped.
#[derive(Clone)]
pub struct TcpServerHandle {
    shared: Weak<ServerShared>,
}

impl TcpServerHandle {
    pub fn send_to(&self, id: ConnectionId, bytes: &[u8]) -> Result<()> {
        self.upgrade()?.send_to(id, bytes)
    }

    pub fn broadcast(&self, bytes: &[u8]) -> Result<usize> {
        self.upgrade()?.broadcast(bytes)
    }

    pub fn close_client(&self, id: ConnectionId) -> Result<()> {
        self.upgrade()?.close_client(id)
    }

    pub fn clients(&self) -> Vec<ClientInfo> {
        self.shared
            .upgrade()
            .map(|s| s.registry.clients())
            .unwrap_or_default()
    }

    fn upgrade(&self) -> Result<Arc<ServerShared>> {
        self.shared.upgrade().ok_or(NetError::NotRunning)
    }
}

impl ServerShared {
    fn send_to(&self, id: ConnectionId, bytes: &[u8]) -> Result<()> {
        let connection = self
            .registry
            .get(id)
            .ok_or(NetError::UnknownConnection(id))?;

        connection.send(bytes).map_err(|e| {
            tracing::debug!("Send to {} ({}) failed: {}", id, connection.addr(), e);
            NetError::Send(e)
        })?;
        tracing::trace!("Sent {} bytes to {}", bytes.len(), id);
        Ok(())
    }

    fn broadcast(&self, bytes: &[u8]) -> Result<usize> {
        let targets = self.registry.snapshot();
        if targets.is_empty() {
            return Err(NetError::NotConnected);
        }

        let mut delivered = 0;
        for connection in &targets {
            match connection.send(bytes) {
                Ok(()) => delivered += 1,
                Err(e) => tracing::debug!(
                    "Broadcast to {} ({}) failed: {}",
                    connection.id(),
                    connection.addr(),
                    e
                ),
            }
        }
        tracing::trace!("Broadcast {} bytes to {}/{}", bytes.len(), delivered, targets.len());
        Ok(delivered)
    }

    fn close_client(&self, id: ConnectionId) -> Result<()> {
        let connection = self
            .registry
            .remove(id)
            .ok_or(NetError::UnknownConnection(id))?;
        connection.close();
        tracing::debug!("Closed connection {} ({})", id, connection.addr());
        Ok(())
    }

    /// Register a freshly accepted stream and queue its receive task
    fn register(self: &Arc<Self>, stream: TcpStream, peer: SocketAddr, pool: &WorkerPool) {
        if self.config.nodelay {
            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
            }
        }

        let id = self.registry.allocate_id();
        let addr = format!("{}:{}", peer.ip(), peer.port());
        let connection = Arc::new(Connection::new(id, addr, stream));
        self.registry.insert(Arc::clone(&connection));

        tracing::debug!("Client connected: {} (id={})", connection.addr(), id);

        if let Some(callback) = self.on_connect.get() {
            callback(id, connection.addr());
        }

        let shared = Arc::clone(self);
        let task_connection = Arc::clone(&connection);
        if let Err(e) = pool.execute(move || shared.serve(task_connection)) {
            tracing::error!("Cannot serve {} (id={}): {}", connection.addr(), id, e);
            self.registry.remove(id);
            connection.close();
        }
    }

    /// Per-connection receive task, run on a pool worker
    fn serve(&self, connection: Arc<Connection>) {
        let id = connection.id();
        let mut reader = connection.stream();
        let mut buffer = vec![0u8; self.config.read_buffer_size];

        loop {
            match reader.read(&mut buffer) {
                Ok(0) => {
                    tracing::debug!("Client disconnected: {} (id={})", connection.addr(), id);
                    break;
                }
                Ok(n) => {
                    tracing::trace!("Received {} bytes from {}", n, id);
                    if let Some(callback) = self.on_message.get() {
                        callback(id, &buffer[..n]);
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    if self.lifecycle.is_running() && !net::is_disconnect(&e) {
                        tracing::warn!(
                            "Receive error from {}: {}",
                            connection.addr(),
                            NetError::Receive(e)
                        );
                    } else {
                        tracing::debug!("Connection {} closed: {}", id, e);
                    }
                    break;
                }
            }
        }

        self.registry.remove(id);
        connection.close();

        if let Some(callback) = self.on_disconnect.get() {
            callback(id);
        }
    }
}

/// Accept thread body; exits once the server leaves `Running`
fn accept_loop(shared: Arc<ServerShared>, pool: Arc<WorkerPool>, listener: Arc<TcpListener>) {
    while shared.lifecycle.is_running() {
        match listener.accept() {
            // A client that slipped in while stopping is dropped unregistered.
            Ok(_) if !shared.lifecycle.is_running() => break,
            Ok((stream, peer)) => shared.register(stream, peer, &pool),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) if !shared.lifecycle.is_running() => break,
            Err(e) => {
                tracing::warn!("Accept failed: {}", e);
                thread::sleep(shared.config.error_backoff());
            }
        }
    }

    tracing::debug!("Accept loop exited");
}
