//! # framecast-server
//!
//! TCP server for framecast.
//!
//! This crate provides:
//! - TCP connection acceptance with a connection limit
//! - Per-connection key-exchange handshakes
//! - A client registry guarded by a single lock
//! - Paced, per-client encrypted broadcast of producer payloads
//! - YAML/environment configuration
//! - Prometheus metrics over HTTP

pub mod broadcast;
pub mod config;
pub mod error;
pub mod handshake;
pub mod metrics;
pub mod producer;
pub mod registry;
pub mod server;

pub use broadcast::{Broadcaster, StreamEnd, TickReport};
pub use config::{
    Config, ConfigError, HandshakeConfig, MetricsConfig, NetworkConfig, SourceConfig, SourceKind,
    StreamConfig,
};
pub use error::ServerError;
pub use handshake::{HandshakeContext, HandshakeOutcome};
pub use metrics::{run_metrics_server, Metrics};
pub use producer::{
    ChannelProducer, FileChunkProducer, PayloadProducer, ProducerError, SourceProducer,
    StaticProducer,
};
pub use registry::{ClientConnection, ClientEntry, ClientId, ClientRegistry};
pub use server::{Server, ServerConfig, ServerStats};
