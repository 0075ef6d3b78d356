//! Length-prefixed frame format.
//!
//! Frame layout (8 bytes header + payload):
//!
//! ```text
//! +----------------------+---------------------+
//! | payload_len (u64 LE) | payload             |
//! | 8 bytes              | payload_len bytes   |
//! +----------------------+---------------------+
//! ```
//!
//! The same framing carries the handshake (client -> server), the handshake
//! reply, and every streamed payload (server -> client).

use crate::error::ProtocolError;
use crate::MAX_PAYLOAD_SIZE;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the frame header in bytes.
pub const FRAME_HEADER_SIZE: usize = 8;

/// A single length-prefixed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub payload: Bytes,
}

impl Frame {
    /// Creates a new frame with the given payload.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// Total encoded size of this frame.
    pub fn encoded_len(&self) -> usize {
        FRAME_HEADER_SIZE + self.payload.len()
    }

    /// Encodes the frame into bytes.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        self.encode_with_limit(MAX_PAYLOAD_SIZE)
    }

    /// Encodes the frame, refusing payloads larger than `max_len`.
    pub fn encode_with_limit(&self, max_len: u64) -> Result<BytesMut, ProtocolError> {
        let payload_len = self.payload.len() as u64;
        if payload_len > max_len {
            return Err(ProtocolError::FrameTooLarge {
                size: payload_len,
                max: max_len,
            });
        }

        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u64_le(payload_len);
        buf.put_slice(&self.payload);
        Ok(buf)
    }

    /// Decodes a frame from bytes.
    ///
    /// Returns `Ok(Some(frame))` if a complete frame was decoded,
    /// `Ok(None)` if more data is needed, or `Err` on protocol errors.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        Self::decode_with_limit(buf, MAX_PAYLOAD_SIZE)
    }

    /// Decodes a frame, rejecting declared lengths above `max_len`.
    pub fn decode_with_limit(
        buf: &mut BytesMut,
        max_len: u64,
    ) -> Result<Option<Self>, ProtocolError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        // Peek at header without consuming
        let mut header = [0u8; FRAME_HEADER_SIZE];
        header.copy_from_slice(&buf[..FRAME_HEADER_SIZE]);
        let payload_len = u64::from_le_bytes(header);

        if payload_len > max_len {
            return Err(ProtocolError::FrameTooLarge {
                size: payload_len,
                max: max_len,
            });
        }

        let total_len = FRAME_HEADER_SIZE + payload_len as usize;
        if buf.len() < total_len {
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_SIZE);
        let payload = buf.split_to(payload_len as usize).freeze();

        Ok(Some(Self { payload }))
    }
}

/// Prefixes `payload` with its length.
pub fn encode_frame(payload: &[u8]) -> Result<BytesMut, ProtocolError> {
    Frame::new(Bytes::copy_from_slice(payload)).encode()
}
