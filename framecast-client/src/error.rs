//! Client error types.

use framecast_protocol::RejectReason;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] framecast_protocol::ProtocolError),

    #[error("cipher error: {0}")]
    Cipher(#[from] framecast_cipher::CipherError),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("timed out")]
    Timeout,

    #[error("handshake rejected ({}): {message}", reason.as_str())]
    Rejected {
        reason: RejectReason,
        message: String,
    },

    #[error("unexpected handshake reply: {0}")]
    UnexpectedReply(String),
}

impl ClientError {
    /// Returns whether reconnecting may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_) | ClientError::Timeout | ClientError::ConnectionClosed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_display() {
        let err = ClientError::Rejected {
            reason: RejectReason::WeakKey,
            message: "modulus has 12 bits, minimum is 1024".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "handshake rejected (weak_key): modulus has 12 bits, minimum is 1024"
        );
        assert!(!err.is_retryable());
        assert!(ClientError::ConnectionClosed.is_retryable());
    }
}
