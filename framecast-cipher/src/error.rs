//! Cipher error types.

use thiserror::Error;

/// Errors raised while building or applying a payload cipher.
#[derive(Debug, Error)]
pub enum CipherError {
    #[error("key rejected: {0}")]
    WeakKey(String),

    #[error("encoding overflow: value needs {needed} bytes, field is {width}")]
    EncodingOverflow { needed: usize, width: usize },

    #[error("ciphertext length {len} is not a multiple of chunk width {width}")]
    InvalidCiphertextLength { len: usize, width: usize },

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("AEAD failure")]
    Aead,

    #[error("unexpected nonce: expected counter {expected}, got {actual}")]
    NonceMismatch { expected: u64, actual: u64 },

    #[error("nonce space exhausted")]
    NonceExhausted,
}
