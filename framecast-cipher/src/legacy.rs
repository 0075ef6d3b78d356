//! Legacy chunked RSA transform.
//!
//! Textbook (unpadded) modular exponentiation applied chunk by chunk:
//!
//! ```text
//! plaintext:  | m0 (w-1 bytes) | m1 (w-1 bytes) | ... | m_k zero-padded |
//! ciphertext: | c0 (w bytes)   | c1 (w bytes)   | ... | c_k (w bytes)   |
//!
//! w = byte_length(modulus), c_i = m_i^e mod n, all integers little-endian
//! ```
//!
//! Input chunks are one byte narrower than the modulus so every `m_i` is
//! strictly below `n`; output chunks are always exactly `w` bytes. The
//! transform is deterministic and malleable and offers no integrity. It
//! exists so v1 clients keep working; new clients use `EcdhSession`.

use crate::error::CipherError;
use crate::{CipherScheme, PayloadCipher};
use num_bigint::BigUint;

/// A client's RSA public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    exponent: BigUint,
    modulus: BigUint,
}

impl PublicKey {
    /// Builds a key, rejecting moduli too small to carry a single input byte.
    pub fn new(exponent: BigUint, modulus: BigUint) -> Result<Self, CipherError> {
        if modulus.bits() < 9 {
            return Err(CipherError::WeakKey(format!(
                "modulus of {} bits cannot hold a chunk",
                modulus.bits()
            )));
        }
        if exponent.bits() == 0 {
            return Err(CipherError::WeakKey("exponent is zero".to_string()));
        }
        Ok(Self { exponent, modulus })
    }

    /// Builds a key from little-endian byte strings, as carried in a v1 handshake.
    pub fn from_le_bytes(modulus: &[u8], exponent: &[u8]) -> Result<Self, CipherError> {
        Self::new(
            BigUint::from_bytes_le(exponent),
            BigUint::from_bytes_le(modulus),
        )
    }

    pub fn exponent(&self) -> &BigUint {
        &self.exponent
    }

    pub fn modulus(&self) -> &BigUint {
        &self.modulus
    }

    /// Modulus size in bits.
    pub fn modulus_bits(&self) -> u64 {
        self.modulus.bits()
    }

    /// Output chunk width: the byte length of the modulus.
    pub fn chunk_width(&self) -> usize {
        byte_length(&self.modulus)
    }

    /// Input chunk width: one byte narrower than the output.
    pub fn input_chunk_width(&self) -> usize {
        self.chunk_width() - 1
    }
}

/// The matching private key. Clients hold this; the server never does.
#[derive(Clone)]
pub struct PrivateKey {
    exponent: BigUint,
    modulus: BigUint,
}

impl PrivateKey {
    pub fn new(exponent: BigUint, modulus: BigUint) -> Result<Self, CipherError> {
        if modulus.bits() < 9 {
            return Err(CipherError::WeakKey(format!(
                "modulus of {} bits cannot hold a chunk",
                modulus.bits()
            )));
        }
        Ok(Self { exponent, modulus })
    }

    pub fn from_le_bytes(modulus: &[u8], exponent: &[u8]) -> Result<Self, CipherError> {
        Self::new(
            BigUint::from_bytes_le(exponent),
            BigUint::from_bytes_le(modulus),
        )
    }

    pub fn chunk_width(&self) -> usize {
        byte_length(&self.modulus)
    }

    pub fn input_chunk_width(&self) -> usize {
        self.chunk_width() - 1
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey")
            .field("modulus_bits", &self.modulus.bits())
            .finish_non_exhaustive()
    }
}

fn byte_length(n: &BigUint) -> usize {
    n.bits().div_ceil(8) as usize
}

/// Serializes `value` little-endian into exactly `width` bytes.
fn put_fixed_le(out: &mut Vec<u8>, value: &BigUint, width: usize) -> Result<(), CipherError> {
    let bytes = value.to_bytes_le();
    // to_bytes_le() yields [0] for zero
    let needed = if value.bits() == 0 { 0 } else { bytes.len() };
    if needed > width {
        return Err(CipherError::EncodingOverflow { needed, width });
    }
    out.extend_from_slice(&bytes[..needed]);
    out.resize(out.len() + (width - needed), 0);
    Ok(())
}

/// Encrypts `data` chunk by chunk under `key`.
///
/// The final chunk is zero-padded; the consumer strips padding. An empty
/// payload yields an empty ciphertext.
pub fn chunk_encrypt(key: &PublicKey, data: &[u8]) -> Result<Vec<u8>, CipherError> {
    let in_width = key.input_chunk_width();
    let out_width = key.chunk_width();
    let chunks = data.len().div_ceil(in_width);
    let mut out = Vec::with_capacity(chunks * out_width);

    let mut padded = vec![0u8; in_width];
    for chunk in data.chunks(in_width) {
        let m = if chunk.len() == in_width {
            BigUint::from_bytes_le(chunk)
        } else {
            padded.fill(0);
            padded[..chunk.len()].copy_from_slice(chunk);
            BigUint::from_bytes_le(&padded)
        };
        let c = m.modpow(&key.exponent, &key.modulus);
        put_fixed_le(&mut out, &c, out_width)?;
    }

    Ok(out)
}

/// Inverts `chunk_encrypt`. Zero padding of the last chunk is kept.
pub fn chunk_decrypt(key: &PrivateKey, data: &[u8]) -> Result<Vec<u8>, CipherError> {
    let in_width = key.input_chunk_width();
    let out_width = key.chunk_width();
    if data.len() % out_width != 0 {
        return Err(CipherError::InvalidCiphertextLength {
            len: data.len(),
            width: out_width,
        });
    }

    let mut out = Vec::with_capacity(data.len() / out_width * in_width);
    for chunk in data.chunks(out_width) {
        let c = BigUint::from_bytes_le(chunk);
        let m = c.modpow(&key.exponent, &key.modulus);
        put_fixed_le(&mut out, &m, in_width)?;
    }

    Ok(out)
}

/// `PayloadCipher` over a client's legacy RSA public key.
#[derive(Debug, Clone)]
pub struct LegacyRsaCipher {
    key: PublicKey,
}

impl LegacyRsaCipher {
    pub fn new(key: PublicKey) -> Self {
        Self { key }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.key
    }
}

impl PayloadCipher for LegacyRsaCipher {
    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        chunk_encrypt(&self.key, plaintext)
    }

    fn scheme(&self) -> CipherScheme {
        CipherScheme::LegacyRsa
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // p = 61, q = 53
    fn toy_pair() -> (PublicKey, PrivateKey) {
        let n = BigUint::from(3233u32);
        (
            PublicKey::new(BigUint::from(17u32), n.clone()).unwrap(),
            PrivateKey::new(BigUint::from(2753u32), n).unwrap(),
        )
    }

    // p = 2^64 - 59, q = 2^64 - 83, e = 65537
    fn medium_pair() -> (PublicKey, PrivateKey) {
        let n = BigUint::parse_bytes(b"ffffffffffffff720000000000001321", 16).unwrap();
        let d = BigUint::parse_bytes(b"93c96c3693c96be3727c8d83727c98e1", 16).unwrap();
        (
            PublicKey::new(BigUint::from(65537u32), n.clone()).unwrap(),
            PrivateKey::new(d, n).unwrap(),
        )
    }

    #[test]
    fn test_chunk_widths() {
        let (public, private) = toy_pair();
        assert_eq!(public.chunk_width(), 2);
        assert_eq!(public.input_chunk_width(), 1);
        assert_eq!(private.chunk_width(), 2);

        let (public, _) = medium_pair();
        assert_eq!(public.modulus_bits(), 128);
        assert_eq!(public.chunk_width(), 16);
        assert_eq!(public.input_chunk_width(), 15);
    }

    #[test]
    fn test_known_vector() {
        // 65^17 mod 3233 = 2790 = 0x0AE6
        let (public, _) = toy_pair();
        let ciphertext = chunk_encrypt(&public, b"A").unwrap();
        assert_eq!(ciphertext, vec![0xE6, 0x0A]);
    }

    #[test]
    fn test_toy_roundtrip() {
        let (public, private) = toy_pair();
        let ciphertext = chunk_encrypt(&public, b"0123456789").unwrap();
        assert_eq!(ciphertext.len(), 20);
        assert_eq!(chunk_decrypt(&private, &ciphertext).unwrap(), b"0123456789");
    }

    #[test]
    fn test_padding_is_zero_filled() {
        let (public, private) = medium_pair();
        let ciphertext = chunk_encrypt(&public, b"abc").unwrap();
        assert_eq!(ciphertext.len(), 16);

        let plaintext = chunk_decrypt(&private, &ciphertext).unwrap();
        assert_eq!(plaintext.len(), 15);
        assert_eq!(&plaintext[..3], b"abc");
        assert!(plaintext[3..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_aligned_input_adds_no_chunk() {
        let (public, _) = medium_pair();
        assert_eq!(chunk_encrypt(&public, &[1u8; 30]).unwrap().len(), 32);
        assert_eq!(chunk_encrypt(&public, &[1u8; 31]).unwrap().len(), 48);
    }

    #[test]
    fn test_empty_payload() {
        let (public, private) = toy_pair();
        let ciphertext = chunk_encrypt(&public, b"").unwrap();
        assert!(ciphertext.is_empty());
        assert!(chunk_decrypt(&private, &ciphertext).unwrap().is_empty());
    }

    #[test]
    fn test_zero_chunk_keeps_full_width() {
        let (public, _) = medium_pair();
        let ciphertext = chunk_encrypt(&public, &[0u8; 15]).unwrap();
        assert_eq!(ciphertext, vec![0u8; 16]);
    }

    #[test]
    fn test_decrypt_rejects_ragged_length() {
        let (_, private) = toy_pair();
        let result = chunk_decrypt(&private, &[1, 2, 3]);
        assert!(matches!(
            result,
            Err(CipherError::InvalidCiphertextLength { len: 3, width: 2 })
        ));
    }

    #[test]
    fn test_wrong_key_overflows_instead_of_truncating() {
        let (public, _) = toy_pair();
        // Identity "private key" leaves c intact, which needs 2 bytes
        let wrong = PrivateKey::new(BigUint::from(1u32), BigUint::from(3233u32)).unwrap();
        let ciphertext = chunk_encrypt(&public, b"A").unwrap();
        let result = chunk_decrypt(&wrong, &ciphertext);
        assert!(matches!(
            result,
            Err(CipherError::EncodingOverflow {
                needed: 2,
                width: 1
            })
        ));
    }

    #[test]
    fn test_tiny_modulus_rejected() {
        let result = PublicKey::new(BigUint::from(3u32), BigUint::from(255u32));
        assert!(matches!(result, Err(CipherError::WeakKey(_))));

        let result = PublicKey::new(BigUint::from(0u32), BigUint::from(3233u32));
        assert!(matches!(result, Err(CipherError::WeakKey(_))));
    }

    #[test]
    fn test_from_le_bytes() {
        let key = PublicKey::from_le_bytes(&[0xA1, 0x0C], &[0x11]).unwrap();
        assert_eq!(key.modulus(), &BigUint::from(3233u32));
        assert_eq!(key.exponent(), &BigUint::from(17u32));
    }

    #[test]
    fn test_cipher_trait() {
        let (public, private) = toy_pair();
        let cipher = LegacyRsaCipher::new(public);
        assert_eq!(cipher.scheme(), CipherScheme::LegacyRsa);
        let sealed = cipher.seal(b"frame").unwrap();
        assert_eq!(chunk_decrypt(&private, &sealed).unwrap(), b"frame");
        assert_eq!(hex::encode(cipher.seal(b"A").unwrap()), "e60a");
    }

    proptest! {
        #[test]
        fn prop_decrypt_inverts_encrypt(payload in proptest::collection::vec(any::<u8>(), 0..200)) {
            let (public, private) = medium_pair();
            let ciphertext = chunk_encrypt(&public, &payload).unwrap();
            prop_assert_eq!(ciphertext.len() % public.chunk_width(), 0);

            let plaintext = chunk_decrypt(&private, &ciphertext).unwrap();
            prop_assert_eq!(&plaintext[..payload.len()], payload.as_slice());
            prop_assert!(plaintext[payload.len()..].iter().all(|&b| b == 0));
        }
    }
}
