//! High-level client API.

use crate::connection::{Connection, ConnectionConfig};
use crate::error::ClientError;
use framecast_cipher::CipherScheme;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// High-level client for framecast.
pub struct Client {
    conn: Arc<Connection>,
}

impl Client {
    /// Creates a new client with the given configuration.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            conn: Arc::new(Connection::new(config)),
        }
    }

    /// Connects to the server and completes the key exchange.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.conn.connect().await
    }

    /// Returns whether the client is connected.
    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    /// Returns the negotiated cipher scheme.
    pub async fn scheme(&self) -> Option<CipherScheme> {
        self.conn.scheme().await
    }

    /// Receives and decrypts the next frame.
    pub async fn recv(&self) -> Result<Vec<u8>, ClientError> {
        self.conn.recv().await
    }

    /// Closes the connection.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.conn.close().await
    }

    /// Returns the underlying connection.
    pub fn connection(&self) -> Arc<Connection> {
        self.conn.clone()
    }

    /// Spawns a background task that forwards decrypted frames to a channel.
    ///
    /// The task ends when the connection fails or the receiver is dropped;
    /// its result carries the error that ended the stream.
    pub fn spawn_receiver(
        &self,
        capacity: usize,
    ) -> (mpsc::Receiver<Vec<u8>>, JoinHandle<Result<(), ClientError>>) {
        let (tx, rx) = mpsc::channel(capacity);
        let conn = self.conn.clone();
        let handle = tokio::spawn(async move {
            loop {
                let frame = conn.recv().await?;
                if tx.send(frame).await.is_err() {
                    tracing::debug!("Frame receiver dropped");
                    return Ok(());
                }
            }
        });
        (rx, handle)
    }
}
