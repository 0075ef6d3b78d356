//! Protocol error types.

use thiserror::Error;

/// Protocol-level errors that can occur during framing or handshake handling.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("connection closed")]
    ConnectionClosed,

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u64, max: u64 },

    #[error("malformed handshake: {0}")]
    MalformedHandshake(String),

    #[error("unsupported handshake version: {0:#04x}")]
    UnsupportedVersion(u8),

    #[error("malformed handshake reply: {0}")]
    MalformedReply(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Returns whether the peer sent something we refuse to parse, as opposed
    /// to the transport going away.
    pub fn is_handshake_rejection(&self) -> bool {
        matches!(
            self,
            ProtocolError::MalformedHandshake(_)
                | ProtocolError::UnsupportedVersion(_)
                | ProtocolError::FrameTooLarge { .. }
        )
    }
}
