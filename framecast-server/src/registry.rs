//! Client registry.
//!
//! One table of connected clients behind a single mutex. Every mutation and
//! every full iteration takes the lock, so a snapshot never observes a
//! half-installed key. Entries are keyed by a process-unique `ClientId`
//! assigned at accept time; the remote address is kept only as an attribute.
//!
//! Removal hands the entry to exactly one caller. That caller, and only that
//! caller, closes the connection.

use crate::error::ServerError;
use framecast_cipher::PayloadCipher;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Identity of one accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(u64);

impl ClientId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Write side of one client socket.
///
/// Writes are serialized; `close` takes the writer out so the socket is shut
/// down at most once and later sends fail with `ConnectionClosed`.
pub struct ClientConnection {
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    closed: AtomicBool,
}

impl ClientConnection {
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            writer: tokio::sync::Mutex::new(Some(Box::new(writer))),
            closed: AtomicBool::new(false),
        }
    }

    /// Writes `bytes` in full and flushes.
    pub async fn send(&self, bytes: &[u8]) -> Result<(), ServerError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(ServerError::ConnectionClosed)?;
        writer.write_all(bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Shuts the socket down. Returns false if it was already closed.
    pub async fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                tracing::trace!("Shutdown of closed socket failed: {}", e);
            }
        }
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConnection")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// One registered client.
#[derive(Clone)]
pub struct ClientEntry {
    pub id: ClientId,
    pub remote_addr: SocketAddr,
    pub connection: Arc<ClientConnection>,
    /// Installed once the handshake completes.
    pub key: Option<Arc<dyn PayloadCipher>>,
    /// True only while `key` is present.
    pub valid: bool,
    pub connected_at: Instant,
}

impl ClientEntry {
    /// Returns the cipher if this client may receive frames.
    pub fn active_cipher(&self) -> Option<&Arc<dyn PayloadCipher>> {
        if self.valid {
            self.key.as_ref()
        } else {
            None
        }
    }
}

impl fmt::Debug for ClientEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientEntry")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("scheme", &self.key.as_ref().map(|k| k.scheme()))
            .field("valid", &self.valid)
            .finish()
    }
}

/// Registry of connected clients.
pub struct ClientRegistry {
    clients: Mutex<BTreeMap<ClientId, ClientEntry>>,
    next_id: AtomicU64,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Adds a freshly accepted connection with no key.
    pub fn register(&self, remote_addr: SocketAddr, connection: Arc<ClientConnection>) -> ClientId {
        let id = ClientId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let entry = ClientEntry {
            id,
            remote_addr,
            connection,
            key: None,
            valid: false,
            connected_at: Instant::now(),
        };
        self.clients.lock().insert(id, entry);
        tracing::debug!("Registered {} from {}", id, remote_addr);
        id
    }

    /// Installs key material and marks the client valid.
    ///
    /// Returns false if the client was removed in the meantime.
    pub fn install_key(&self, id: ClientId, cipher: Arc<dyn PayloadCipher>) -> bool {
        let mut clients = self.clients.lock();
        match clients.get_mut(&id) {
            Some(entry) => {
                entry.key = Some(cipher);
                entry.valid = true;
                true
            }
            None => false,
        }
    }

    /// Removes a client. A second removal of the same id returns `None`.
    pub fn remove(&self, id: ClientId) -> Option<ClientEntry> {
        self.clients.lock().remove(&id)
    }

    /// Removes a client and closes its connection.
    ///
    /// Returns true only for the call that actually evicted it.
    pub async fn evict(&self, id: ClientId) -> bool {
        match self.remove(id) {
            Some(entry) => {
                entry.connection.close().await;
                tracing::debug!(
                    "Evicted {} ({}) after {:?}",
                    id,
                    entry.remote_addr,
                    entry.connected_at.elapsed()
                );
                true
            }
            None => false,
        }
    }

    /// Point-in-time copy of all entries, in accept order.
    pub fn snapshot(&self) -> Vec<ClientEntry> {
        self.clients.lock().values().cloned().collect()
    }

    /// Removes every entry.
    pub fn drain(&self) -> Vec<ClientEntry> {
        std::mem::take(&mut *self.clients.lock())
            .into_values()
            .collect()
    }

    /// Removes every entry and closes its connection. Returns how many were closed.
    pub async fn close_all(&self) -> usize {
        let entries = self.drain();
        let mut closed = 0;
        for entry in &entries {
            if entry.connection.close().await {
                closed += 1;
            }
        }
        closed
    }

    pub fn get(&self, id: ClientId) -> Option<ClientEntry> {
        self.clients.lock().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.lock().is_empty()
    }

    /// Number of clients that have completed key exchange.
    pub fn valid_count(&self) -> usize {
        self.clients.lock().values().filter(|e| e.valid).count()
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}
