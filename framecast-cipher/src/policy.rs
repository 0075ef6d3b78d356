//! Strength checks for client-supplied key material.

use crate::error::CipherError;
use crate::legacy::PublicKey;
use num_bigint::BigUint;

/// Limits applied to legacy RSA keys before they are installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPolicy {
    /// Smallest accepted modulus, in bits.
    pub min_modulus_bits: u64,
    /// Largest accepted modulus, in bits.
    pub max_modulus_bits: u64,
}

impl Default for KeyPolicy {
    fn default() -> Self {
        Self {
            min_modulus_bits: 1024,
            max_modulus_bits: 8192,
        }
    }
}

impl KeyPolicy {
    pub fn new(min_modulus_bits: u64, max_modulus_bits: u64) -> Self {
        Self {
            min_modulus_bits,
            max_modulus_bits,
        }
    }

    /// Checks modulus size and parity and exponent range.
    pub fn validate(&self, key: &PublicKey) -> Result<(), CipherError> {
        let bits = key.modulus_bits();
        if bits < self.min_modulus_bits {
            return Err(CipherError::WeakKey(format!(
                "modulus has {} bits, minimum is {}",
                bits, self.min_modulus_bits
            )));
        }
        if bits > self.max_modulus_bits {
            return Err(CipherError::WeakKey(format!(
                "modulus has {} bits, maximum is {}",
                bits, self.max_modulus_bits
            )));
        }
        if !key.modulus().bit(0) {
            return Err(CipherError::WeakKey("modulus is even".to_string()));
        }

        let e = key.exponent();
        if !e.bit(0) {
            return Err(CipherError::WeakKey("exponent is even".to_string()));
        }
        if *e <= BigUint::from(1u32) || e >= key.modulus() {
            return Err(CipherError::WeakKey(
                "exponent out of range (1, n)".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(e: u32, n: u32) -> PublicKey {
        PublicKey::new(BigUint::from(e), BigUint::from(n)).unwrap()
    }

    #[test]
    fn test_default_rejects_toy_key() {
        let result = KeyPolicy::default().validate(&key(17, 3233));
        assert!(matches!(result, Err(CipherError::WeakKey(_))));
    }

    #[test]
    fn test_relaxed_policy_accepts_toy_key() {
        let policy = KeyPolicy::new(9, 4096);
        assert!(policy.validate(&key(17, 3233)).is_ok());
    }

    #[test]
    fn test_modulus_too_large() {
        let policy = KeyPolicy::new(9, 10);
        assert!(policy.validate(&key(17, 3233)).is_err());
    }

    #[test]
    fn test_even_values_rejected() {
        let policy = KeyPolicy::new(9, 4096);
        assert!(policy.validate(&key(17, 3232)).is_err());
        assert!(policy.validate(&key(16, 3233)).is_err());
    }

    #[test]
    fn test_exponent_range() {
        let policy = KeyPolicy::new(9, 4096);
        assert!(policy.validate(&key(1, 3233)).is_err());
        assert!(policy.validate(&key(3235, 3233)).is_err());
        assert!(policy.validate(&key(3, 3233)).is_ok());
    }
}
