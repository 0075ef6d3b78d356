//! Buffered and async frame readers/writers.

use crate::error::ProtocolError;
use crate::frame::{Frame, FRAME_HEADER_SIZE};
use crate::MAX_PAYLOAD_SIZE;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Incremental decoder for a stream of frames.
pub struct Decoder {
    buffer: BytesMut,
    max_payload: u64,
}

impl Decoder {
    pub fn new() -> Self {
        Self::with_limit(MAX_PAYLOAD_SIZE)
    }

    /// Creates a decoder that rejects frames larger than `max_payload`.
    pub fn with_limit(max_payload: u64) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            max_payload,
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next frame from the buffer.
    pub fn decode_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        Frame::decode_with_limit(&mut self.buffer, self.max_payload)
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

fn map_eof(e: std::io::Error) -> ProtocolError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        ProtocolError::ConnectionClosed
    } else {
        ProtocolError::Io(e)
    }
}

/// Reads exactly one frame from `reader`.
///
/// Suspends until the full header and payload have arrived. End of stream
/// before either is complete yields `ConnectionClosed`; a declared length
/// above `max_len` is rejected before any payload byte is read.
pub async fn read_frame<R>(reader: &mut R, max_len: u64) -> Result<Bytes, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_SIZE];
    reader.read_exact(&mut header).await.map_err(map_eof)?;

    let payload_len = u64::from_le_bytes(header);
    if payload_len > max_len {
        return Err(ProtocolError::FrameTooLarge {
            size: payload_len,
            max: max_len,
        });
    }

    let mut payload = vec![0u8; payload_len as usize];
    reader.read_exact(&mut payload).await.map_err(map_eof)?;
    Ok(Bytes::from(payload))
}

/// Frames `payload` and writes it to `writer`.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let encoded = crate::frame::encode_frame(payload)?;
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::encode_frame;

    #[test]
    fn test_partial_frame_decoding() {
        let encoded = encode_frame(b"payload").unwrap();
        let mut decoder = Decoder::new();

        decoder.extend(&encoded[..5]);
        assert!(decoder.decode_frame().unwrap().is_none());

        decoder.extend(&encoded[5..]);
        let frame = decoder.decode_frame().unwrap().unwrap();
        assert_eq!(frame.payload.as_ref(), b"payload");
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_decoder_buffered() {
        let mut decoder = Decoder::default();
        assert_eq!(decoder.buffered(), 0);

        decoder.extend(b"some data");
        assert_eq!(decoder.buffered(), 9);

        decoder.clear();
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_decoder_limit() {
        let mut decoder = Decoder::with_limit(4);
        decoder.extend(&encode_frame(b"too long").unwrap());
        assert!(matches!(
            decoder.decode_frame(),
            Err(ProtocolError::FrameTooLarge { size: 8, max: 4 })
        ));
    }

    #[tokio::test]
    async fn test_read_frame_across_chunks() {
        let encoded = encode_frame(b"split across writes").unwrap();
        let mut reader = tokio_test::io::Builder::new()
            .read(&encoded[..3])
            .read(&encoded[3..11])
            .read(&encoded[11..])
            .build();

        let payload = read_frame(&mut reader, MAX_PAYLOAD_SIZE).await.unwrap();
        assert_eq!(payload.as_ref(), b"split across writes");
    }

    #[tokio::test]
    async fn test_read_frame_eof_in_header() {
        let mut reader = tokio_test::io::Builder::new().read(&[4, 0, 0]).build();
        let result = read_frame(&mut reader, MAX_PAYLOAD_SIZE).await;
        assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_read_frame_eof_in_payload() {
        let encoded = encode_frame(b"abcdef").unwrap();
        let mut reader = tokio_test::io::Builder::new()
            .read(&encoded[..FRAME_HEADER_SIZE + 2])
            .build();
        let result = read_frame(&mut reader, MAX_PAYLOAD_SIZE).await;
        assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_read_frame_rejects_oversized_length() {
        let mut reader = tokio_test::io::Builder::new()
            .read(&1_000_000u64.to_le_bytes())
            .build();
        let result = read_frame(&mut reader, 1024).await;
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let writer = tokio::spawn(async move {
            write_frame(&mut client, b"").await.unwrap();
            write_frame(&mut client, b"x").await.unwrap();
        });

        let empty = read_frame(&mut server, MAX_PAYLOAD_SIZE).await.unwrap();
        let one = read_frame(&mut server, MAX_PAYLOAD_SIZE).await.unwrap();
        writer.await.unwrap();

        assert!(empty.is_empty());
        assert_eq!(one.as_ref(), b"x");
    }
}
