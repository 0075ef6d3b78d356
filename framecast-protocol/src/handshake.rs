//! Handshake messages.
//!
//! A client sends exactly one handshake message, framed like any other
//! payload, immediately after connecting. The first byte selects the layout:
//!
//! ```text
//! v1 (legacy RSA):
//! +------+----------------+----------------+-----------+-----------+
//! | 0x01 | len_n (u32 LE) | len_e (u32 LE) | n (LE)    | e (LE)    |
//! +------+----------------+----------------+-----------+-----------+
//!
//! v2 (ECDH P-256):
//! +------+----------------+-----------------------+
//! | 0x02 | len_k (u32 LE) | SEC1 public key       |
//! +------+----------------+-----------------------+
//! ```
//!
//! The server answers with one framed reply:
//!
//! ```text
//! accepted: | 0x00 | version | [v2: len_k (u32 LE) | server SEC1 key | salt (32)] |
//! rejected: | 0x01 | reason  | UTF-8 message                               |
//! ```

use crate::error::ProtocolError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Handshake layout version for the legacy chunked RSA transform.
pub const HANDSHAKE_V1_LEGACY_RSA: u8 = 0x01;

/// Handshake layout version for ECDH P-256 + AES-256-GCM.
pub const HANDSHAKE_V2_ECDH_P256: u8 = 0x02;

/// Length of the HKDF salt carried in a v2 acceptance.
pub const SALT_LEN: usize = 32;

const REPLY_ACCEPTED: u8 = 0x00;
const REPLY_REJECTED: u8 = 0x01;

/// A parsed client handshake.
///
/// Big integers are kept as raw little-endian bytes; interpreting them is the
/// cipher layer's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeMessage {
    LegacyRsa { modulus: Bytes, exponent: Bytes },
    EcdhP256 { public_key: Bytes },
}

impl HandshakeMessage {
    /// Returns the layout version byte.
    pub fn version(&self) -> u8 {
        match self {
            HandshakeMessage::LegacyRsa { .. } => HANDSHAKE_V1_LEGACY_RSA,
            HandshakeMessage::EcdhP256 { .. } => HANDSHAKE_V2_ECDH_P256,
        }
    }

    /// Encodes the handshake body (without the outer frame).
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8(self.version());
        match self {
            HandshakeMessage::LegacyRsa { modulus, exponent } => {
                buf.put_u32_le(modulus.len() as u32);
                buf.put_u32_le(exponent.len() as u32);
                buf.put_slice(modulus);
                buf.put_slice(exponent);
            }
            HandshakeMessage::EcdhP256 { public_key } => {
                buf.put_u32_le(public_key.len() as u32);
                buf.put_slice(public_key);
            }
        }
        buf
    }

    /// Parses a handshake body.
    ///
    /// Declared lengths that overrun the buffer, trailing bytes, and unknown
    /// versions are all rejected; nothing is guessed.
    pub fn parse(raw: &[u8]) -> Result<Self, ProtocolError> {
        let mut buf = raw;
        if !buf.has_remaining() {
            return Err(ProtocolError::MalformedHandshake(
                "empty handshake".to_string(),
            ));
        }

        let message = match buf.get_u8() {
            HANDSHAKE_V1_LEGACY_RSA => {
                let len_n = take_len(&mut buf, "modulus length")?;
                let len_e = take_len(&mut buf, "exponent length")?;
                let modulus = take_bytes(&mut buf, len_n, "modulus")?;
                let exponent = take_bytes(&mut buf, len_e, "exponent")?;
                HandshakeMessage::LegacyRsa { modulus, exponent }
            }
            HANDSHAKE_V2_ECDH_P256 => {
                let len_k = take_len(&mut buf, "public key length")?;
                let public_key = take_bytes(&mut buf, len_k, "public key")?;
                HandshakeMessage::EcdhP256 { public_key }
            }
            other => return Err(ProtocolError::UnsupportedVersion(other)),
        };

        if buf.has_remaining() {
            return Err(ProtocolError::MalformedHandshake(format!(
                "{} trailing bytes",
                buf.remaining()
            )));
        }

        Ok(message)
    }
}

fn take_len(buf: &mut &[u8], field: &str) -> Result<usize, ProtocolError> {
    if buf.remaining() < 4 {
        return Err(ProtocolError::MalformedHandshake(format!(
            "truncated {}",
            field
        )));
    }
    Ok(buf.get_u32_le() as usize)
}

fn take_bytes(buf: &mut &[u8], len: usize, field: &str) -> Result<Bytes, ProtocolError> {
    if buf.remaining() < len {
        return Err(ProtocolError::MalformedHandshake(format!(
            "{} declares {} bytes, {} available",
            field,
            len,
            buf.remaining()
        )));
    }
    Ok(buf.copy_to_bytes(len))
}

/// Why a handshake was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RejectReason {
    Malformed = 1,
    UnsupportedVersion = 2,
    WeakKey = 3,
    TooLarge = 4,
}

impl RejectReason {
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            1 => Some(RejectReason::Malformed),
            2 => Some(RejectReason::UnsupportedVersion),
            3 => Some(RejectReason::WeakKey),
            4 => Some(RejectReason::TooLarge),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::Malformed => "malformed",
            RejectReason::UnsupportedVersion => "unsupported_version",
            RejectReason::WeakKey => "weak_key",
            RejectReason::TooLarge => "too_large",
        }
    }
}

impl From<&ProtocolError> for RejectReason {
    fn from(err: &ProtocolError) -> Self {
        match err {
            ProtocolError::UnsupportedVersion(_) => RejectReason::UnsupportedVersion,
            ProtocolError::FrameTooLarge { .. } => RejectReason::TooLarge,
            _ => RejectReason::Malformed,
        }
    }
}

/// Parameters returned to a client whose handshake was accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeAccept {
    LegacyRsa,
    EcdhP256 {
        server_public_key: Bytes,
        salt: [u8; SALT_LEN],
    },
}

/// Server reply to a handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeReply {
    Accepted(HandshakeAccept),
    Rejected {
        reason: RejectReason,
        message: String,
    },
}

impl HandshakeReply {
    pub fn rejected(reason: RejectReason, message: impl Into<String>) -> Self {
        HandshakeReply::Rejected {
            reason,
            message: message.into(),
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, HandshakeReply::Accepted(_))
    }

    /// Encodes the reply body (without the outer frame).
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        match self {
            HandshakeReply::Accepted(HandshakeAccept::LegacyRsa) => {
                buf.put_u8(REPLY_ACCEPTED);
                buf.put_u8(HANDSHAKE_V1_LEGACY_RSA);
            }
            HandshakeReply::Accepted(HandshakeAccept::EcdhP256 {
                server_public_key,
                salt,
            }) => {
                buf.put_u8(REPLY_ACCEPTED);
                buf.put_u8(HANDSHAKE_V2_ECDH_P256);
                buf.put_u32_le(server_public_key.len() as u32);
                buf.put_slice(server_public_key);
                buf.put_slice(salt);
            }
            HandshakeReply::Rejected { reason, message } => {
                buf.put_u8(REPLY_REJECTED);
                buf.put_u8(*reason as u8);
                buf.put_slice(message.as_bytes());
            }
        }
        buf
    }

    /// Parses a reply body.
    pub fn parse(raw: &[u8]) -> Result<Self, ProtocolError> {
        let mut buf = raw;
        if buf.remaining() < 2 {
            return Err(ProtocolError::MalformedReply("truncated reply".to_string()));
        }

        match (buf.get_u8(), buf.get_u8()) {
            (REPLY_ACCEPTED, HANDSHAKE_V1_LEGACY_RSA) if !buf.has_remaining() => {
                Ok(HandshakeReply::Accepted(HandshakeAccept::LegacyRsa))
            }
            (REPLY_ACCEPTED, HANDSHAKE_V2_ECDH_P256) => {
                if buf.remaining() < 4 {
                    return Err(ProtocolError::MalformedReply(
                        "truncated key length".to_string(),
                    ));
                }
                let len_k = buf.get_u32_le() as usize;
                if buf.remaining() != len_k + SALT_LEN {
                    return Err(ProtocolError::MalformedReply(format!(
                        "expected {} key and salt bytes, got {}",
                        len_k + SALT_LEN,
                        buf.remaining()
                    )));
                }
                let server_public_key = buf.copy_to_bytes(len_k);
                let mut salt = [0u8; SALT_LEN];
                buf.copy_to_slice(&mut salt);
                Ok(HandshakeReply::Accepted(HandshakeAccept::EcdhP256 {
                    server_public_key,
                    salt,
                }))
            }
            (REPLY_REJECTED, code) => {
                let reason = RejectReason::from_u8(code).ok_or_else(|| {
                    ProtocolError::MalformedReply(format!("unknown reject reason {}", code))
                })?;
                let message = String::from_utf8_lossy(buf).into_owned();
                Ok(HandshakeReply::Rejected { reason, message })
            }
            (status, version) => Err(ProtocolError::MalformedReply(format!(
                "unexpected status {:#04x} / version {:#04x}",
                status, version
            ))),
        }
    }
}
