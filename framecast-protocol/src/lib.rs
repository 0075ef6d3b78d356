//! # framecast-protocol
//!
//! Wire protocol implementation for framecast.
//!
//! This crate provides:
//! - Length-prefixed framing (8-byte little-endian length + payload)
//! - Incremental and async frame readers/writers
//! - Versioned handshake messages and handshake replies
//! - Protocol error types and constants

pub mod codec;
pub mod error;
pub mod frame;
pub mod handshake;

pub use codec::{read_frame, write_frame, Decoder};
pub use error::ProtocolError;
pub use frame::{encode_frame, Frame, FRAME_HEADER_SIZE};
pub use handshake::{HandshakeAccept, HandshakeMessage, HandshakeReply, RejectReason};

/// Default port for the framecast server.
pub const DEFAULT_PORT: u16 = 9999;

/// Maximum frame payload size (64 MiB).
pub const MAX_PAYLOAD_SIZE: u64 = 64 * 1024 * 1024;

/// Maximum size of a handshake message (64 KiB).
pub const MAX_HANDSHAKE_SIZE: u64 = 64 * 1024;
