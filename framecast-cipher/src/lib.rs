//! # framecast-cipher
//!
//! Per-client payload ciphers for framecast.
//!
//! This crate provides:
//! - The `PayloadCipher` seam the broadcaster seals payloads through
//! - `EcdhSession`: P-256 ECDH, HKDF-SHA256 and AES-256-GCM (the default path)
//! - `legacy`: the unpadded chunked modular-exponentiation transform, kept
//!   for compatibility with v1 clients only
//! - `KeyPolicy`: minimum-strength checks applied to client key material

pub mod error;
pub mod legacy;
pub mod policy;
pub mod session;

pub use error::CipherError;
pub use legacy::{chunk_decrypt, chunk_encrypt, LegacyRsaCipher, PrivateKey, PublicKey};
pub use policy::KeyPolicy;
pub use session::{ClientKeyExchange, EcdhSession, ServerKeyExchange};

use std::fmt;

/// Identifies which transform a cipher applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherScheme {
    /// Deterministic, malleable chunked RSA. Compatibility only.
    LegacyRsa,
    /// Authenticated encryption under an ECDH-derived key.
    EcdhAesGcm,
}

impl CipherScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            CipherScheme::LegacyRsa => "legacy_rsa",
            CipherScheme::EcdhAesGcm => "ecdh_aes_gcm",
        }
    }
}

impl fmt::Display for CipherScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Seals outgoing payloads for one client.
pub trait PayloadCipher: Send + Sync {
    /// Encrypts `plaintext`. Never truncates; any width overflow is an error.
    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError>;

    /// Which transform this cipher applies.
    fn scheme(&self) -> CipherScheme;
}
