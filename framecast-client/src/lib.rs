//! # framecast-client
//!
//! Client library for framecast.
//!
//! This crate provides:
//! - Async TCP client with connect and handshake timeouts
//! - ECDH P-256 (default) or legacy chunked RSA key exchange
//! - Frame reception and per-scheme decryption

pub mod client;
pub mod connection;
pub mod error;

pub use client::Client;
pub use connection::{Connection, ConnectionConfig, KeyExchangeMode};
pub use error::ClientError;
