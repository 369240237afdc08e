//! Connection Registry
//!
//! Live mapping from `ConnectionId` to connection, guarded by one mutex.
//!
//! The lock covers only map operations. Writes and callbacks happen on
//! `Arc<Connection>` clones taken out of the map.

use std::collections::HashMap;
use std::io::{self, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{ClientInfo, ConnectionId};

/// One accepted stream
pub(crate) struct Connection {
    id: ConnectionId,
    addr: String,
    stream: TcpStream,

    /// Serializes writers so concurrent sends never interleave
    write_lock: Mutex<()>,
}

impl Connection {
    pub(crate) fn new(id: ConnectionId, addr: String, stream: TcpStream) -> Self {
        Self {
            id,
            addr,
            stream,
            write_lock: Mutex::new(()),
        }
    }

    pub(crate) fn id(&self) -> ConnectionId {
        self.id
    }

    pub(crate) fn addr(&self) -> &str {
        &self.addr
    }

    pub(crate) fn stream(&self) -> &TcpStream {
        &self.stream
    }

    /// Write the whole payload or fail
    pub(crate) fn send(&self, bytes: &[u8]) -> io::Result<()> {
        let _guard = self.write_lock.lock();
        (&self.stream).write_all(bytes)?;
        (&self.stream).flush()
    }

    /// Shut both directions down, waking any reader blocked on the socket
    pub(crate) fn close(&self) {
        // NotConnected here just means the peer got there first.
        let _ = self.stream.shutdown(Shutdown::Both);
    }

    fn info(&self) -> ClientInfo {
        ClientInfo {
            id: self.id,
            addr: self.addr.clone(),
        }
    }
}

/// Registry of live connections for one server
pub(crate) struct ConnectionRegistry {
    connections: Mutex<HashMap<ConnectionId, Arc<Connection>>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub(crate) fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate a fresh id (monotonic, never reused)
    pub(crate) fn allocate_id(&self) -> ConnectionId {
        ConnectionId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    pub(crate) fn insert(&self, connection: Arc<Connection>) {
        self.connections.lock().insert(connection.id(), connection);
    }

    pub(crate) fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.lock().remove(&id)
    }

    pub(crate) fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.lock().get(&id).cloned()
    }

    /// Clone every live connection out of the map
    pub(crate) fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.lock().values().cloned().collect()
    }

    /// Remove and return every live connection
    pub(crate) fn drain(&self) -> Vec<Arc<Connection>> {
        self.connections.lock().drain().map(|(_, c)| c).collect()
    }

    /// Point-in-time listing sorted by id
    pub(crate) fn clients(&self) -> Vec<ClientInfo> {
        let mut clients: Vec<ClientInfo> = self
            .connections
            .lock()
            .values()
            .map(|c| c.info())
            .collect();
        clients.sort_by_key(|c| c.id);
        clients
    }

    pub(crate) fn len(&self) -> usize {
        self.connections.lock().len()
    }
}
