//! ECDH P-256 + AES-256-GCM stream sessions.
//!
//! Both sides contribute an ephemeral P-256 key. The x-coordinate of the
//! shared point is run through HKDF-SHA256 with a server-chosen random salt
//! to derive one AES-256-GCM key per connection. Sealed payload layout:
//!
//! ```text
//! +------------------------------+---------------------------+
//! | nonce (12 bytes)             | ciphertext || tag (16)    |
//! | 0x00000000 || counter (u64 BE)                           |
//! +------------------------------+---------------------------+
//! ```
//!
//! The counter starts at zero and increases by one per sealed payload; the
//! receiver accepts only the next expected value, so frames that are
//! replayed, dropped or reordered fail to open.

use crate::error::CipherError;
use crate::{CipherScheme, PayloadCipher};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use hkdf::Hkdf;
use p256::ecdh::EphemeralSecret;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::PublicKey;
use rand_core::{OsRng, RngCore};
use sha2::Sha256;
use std::sync::atomic::{AtomicU64, Ordering};

/// AES-GCM nonce length.
pub const NONCE_LEN: usize = 12;

/// AES-GCM tag length.
pub const TAG_LEN: usize = 16;

/// HKDF salt length.
pub const SALT_LEN: usize = 32;

const HKDF_INFO: &[u8] = b"framecast v2 stream";

/// An established AEAD session for one connection.
pub struct EcdhSession {
    cipher: Aes256Gcm,
    /// Next nonce counter to seal with, or to expect when opening.
    counter: AtomicU64,
}

impl EcdhSession {
    fn derive(shared_secret: &[u8], salt: &[u8; SALT_LEN]) -> Result<Self, CipherError> {
        let hkdf = Hkdf::<Sha256>::new(Some(salt), shared_secret);
        let mut derived_key = [0u8; 32];
        hkdf.expand(HKDF_INFO, &mut derived_key)
            .map_err(|e| CipherError::KeyDerivation(e.to_string()))?;

        let key = Key::<Aes256Gcm>::from(derived_key);
        Ok(Self {
            cipher: Aes256Gcm::new(&key),
            counter: AtomicU64::new(0),
        })
    }

    fn next_counter(&self) -> Result<u64, CipherError> {
        self.counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| c.checked_add(1))
            .map_err(|_| CipherError::NonceExhausted)
    }

    fn nonce_for(counter: u64) -> [u8; NONCE_LEN] {
        let mut nonce = [0u8; NONCE_LEN];
        nonce[4..].copy_from_slice(&counter.to_be_bytes());
        nonce
    }

    /// Opens a payload sealed by the peer's session.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CipherError> {
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(CipherError::Aead);
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);

        let mut counter_bytes = [0u8; 8];
        counter_bytes.copy_from_slice(&nonce[4..]);
        let actual = u64::from_be_bytes(counter_bytes);
        let expected = self.counter.load(Ordering::SeqCst);
        if nonce[..4] != [0u8; 4] || actual != expected {
            return Err(CipherError::NonceMismatch { expected, actual });
        }

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CipherError::Aead)?;
        self.next_counter()?;
        Ok(plaintext)
    }
}

impl PayloadCipher for EcdhSession {
    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let nonce = Self::nonce_for(self.next_counter()?);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CipherError::Aead)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn scheme(&self) -> CipherScheme {
        CipherScheme::EcdhAesGcm
    }
}

impl std::fmt::Debug for EcdhSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EcdhSession")
            .field("counter", &self.counter.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Server half of the exchange: answers a client's public key.
pub struct ServerKeyExchange {
    /// Server ephemeral public key, SEC1 uncompressed.
    pub public_key: Vec<u8>,
    pub salt: [u8; SALT_LEN],
    pub session: EcdhSession,
}

impl ServerKeyExchange {
    /// Completes the exchange against a client's SEC1-encoded public key.
    pub fn accept(client_public_key: &[u8]) -> Result<Self, CipherError> {
        let peer = PublicKey::from_sec1_bytes(client_public_key)
            .map_err(|e| CipherError::InvalidPublicKey(e.to_string()))?;

        let secret = EphemeralSecret::random(&mut OsRng);
        let public_key = secret.public_key().to_encoded_point(false).as_bytes().to_vec();

        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);

        let shared = secret.diffie_hellman(&peer);
        let session = EcdhSession::derive(shared.raw_secret_bytes().as_slice(), &salt)?;

        Ok(Self {
            public_key,
            salt,
            session,
        })
    }
}

/// Client half of the exchange.
pub struct ClientKeyExchange {
    secret: EphemeralSecret,
    public_key: Vec<u8>,
}

impl ClientKeyExchange {
    /// Generates a fresh ephemeral key pair.
    pub fn new() -> Self {
        let secret = EphemeralSecret::random(&mut OsRng);
        let public_key = secret.public_key().to_encoded_point(false).as_bytes().to_vec();
        Self { secret, public_key }
    }

    /// SEC1 uncompressed public key to send in the handshake.
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Derives the session from the server's reply.
    pub fn complete(
        self,
        server_public_key: &[u8],
        salt: &[u8; SALT_LEN],
    ) -> Result<EcdhSession, CipherError> {
        let peer = PublicKey::from_sec1_bytes(server_public_key)
            .map_err(|e| CipherError::InvalidPublicKey(e.to_string()))?;
        let shared = self.secret.diffie_hellman(&peer);
        EcdhSession::derive(shared.raw_secret_bytes().as_slice(), salt)
    }
}

impl Default for ClientKeyExchange {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn established() -> (EcdhSession, EcdhSession) {
        let client = ClientKeyExchange::new();
        let server = ServerKeyExchange::accept(client.public_key()).unwrap();
        let client_session = client.complete(&server.public_key, &server.salt).unwrap();
        (server.session, client_session)
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let (server, client) = established();

        for payload in [&b""[..], b"x", b"a longer video frame payload"] {
            let sealed = server.seal(payload).unwrap();
            assert_eq!(sealed.len(), NONCE_LEN + payload.len() + TAG_LEN);
            assert_eq!(client.open(&sealed).unwrap(), payload);
        }
    }

    #[test]
    fn test_same_plaintext_differs_per_frame() {
        let (server, _) = established();
        let a = server.seal(b"frame").unwrap();
        let b = server.seal(b"frame").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let (server, client) = established();
        let mut sealed = server.seal(b"frame").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(matches!(client.open(&sealed), Err(CipherError::Aead)));
    }

    #[test]
    fn test_replay_rejected() {
        let (server, client) = established();
        let sealed = server.seal(b"frame").unwrap();
        client.open(&sealed).unwrap();
        assert!(matches!(
            client.open(&sealed),
            Err(CipherError::NonceMismatch {
                expected: 1,
                actual: 0
            })
        ));
    }

    #[test]
    fn test_skipped_frame_rejected() {
        let (server, client) = established();
        let _dropped = server.seal(b"one").unwrap();
        let second = server.seal(b"two").unwrap();
        assert!(matches!(
            client.open(&second),
            Err(CipherError::NonceMismatch { .. })
        ));
    }

    #[test]
    fn test_independent_sessions_do_not_interoperate() {
        let (server_a, _) = established();
        let (_, client_b) = established();
        let sealed = server_a.seal(b"frame").unwrap();
        assert!(matches!(client_b.open(&sealed), Err(CipherError::Aead)));
    }

    #[test]
    fn test_invalid_client_key() {
        let result = ServerKeyExchange::accept(&[4, 1, 2, 3]);
        assert!(matches!(result, Err(CipherError::InvalidPublicKey(_))));
    }

    #[test]
    fn test_short_sealed_payload() {
        let (_, client) = established();
        assert!(matches!(client.open(&[0u8; 10]), Err(CipherError::Aead)));
    }

    #[test]
    fn test_public_key_is_uncompressed_sec1() {
        let client = ClientKeyExchange::new();
        assert_eq!(client.public_key().len(), 65);
        assert_eq!(client.public_key()[0], 0x04);
        assert_eq!(
            ServerKeyExchange::accept(client.public_key())
                .unwrap()
                .session
                .scheme(),
            CipherScheme::EcdhAesGcm
        );
    }
}
