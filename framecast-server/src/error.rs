//! Server error types.

use crate::config::ConfigError;
use crate::producer::ProducerError;
use framecast_cipher::CipherError;
use framecast_protocol::ProtocolError;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("cipher error: {0}")]
    Cipher(#[from] CipherError),

    #[error("producer error: {0}")]
    Producer(#[from] ProducerError),

    #[error("send timed out after {0:?}")]
    SendTimeout(Duration),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl ServerError {
    /// Returns whether this error stops the whole server rather than one connection.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ServerError::Bind { .. }
                | ServerError::Config(_)
                | ServerError::Metrics(_)
                | ServerError::Producer(_)
        )
    }

    /// Label used when this error causes a client to be evicted.
    pub fn eviction_reason(&self) -> &'static str {
        match self {
            ServerError::SendTimeout(_) => "send_timeout",
            ServerError::Cipher(_) => "cipher",
            ServerError::Protocol(ProtocolError::FrameTooLarge { .. }) => "too_large",
            ServerError::Protocol(_) | ServerError::Io(_) | ServerError::ConnectionClosed => "io",
            _ => "other",
        }
    }
}
