//! Server configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via FRAMECAST_CONFIG)
//! 3. Environment variables

use crate::producer::{FileChunkProducer, ProducerError, SourceProducer, StaticProducer};
use bytes::Bytes;
use framecast_cipher::KeyPolicy;
use framecast_protocol::{DEFAULT_PORT, MAX_HANDSHAKE_SIZE};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Network configuration.
    pub network: NetworkConfig,
    /// Broadcast pacing and delivery.
    pub stream: StreamConfig,
    /// Key exchange.
    pub handshake: HandshakeConfig,
    /// Where payloads come from.
    pub source: SourceConfig,
    /// Metrics configuration.
    pub metrics: MetricsConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("FRAMECAST_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Self::from_yaml(&content).map_err(|e| match e {
            ConfigError::ParseError(_, msg) => ConfigError::ParseError(path.to_path_buf(), msg),
            other => other,
        })
    }

    /// Parses configuration from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content)
            .map_err(|e| ConfigError::ParseError(PathBuf::from("<inline>"), e.to_string()))
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        self.network.apply_env_overrides();
        self.stream.apply_env_overrides();
        self.handshake.apply_env_overrides();
        self.source.apply_env_overrides();
        self.metrics.apply_env_overrides();
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "max_connections must be positive".to_string(),
            ));
        }
        self.stream.validate()?;
        self.handshake.validate()?;
        self.source.validate()?;
        Ok(())
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind to.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections, handshaking or streaming.
    pub max_connections: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            max_connections: 1000,
        }
    }
}

impl NetworkConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("FRAMECAST_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind_addr = parsed;
            }
        }

        if let Ok(max) = std::env::var("FRAMECAST_MAX_CONNECTIONS") {
            if let Ok(n) = max.parse() {
                self.max_connections = n;
            }
        }
    }
}

const DEFAULT_FRAME_RATE: f64 = 30.0;

/// Tick period for `rate` frames per second; `None` if it overflows a
/// `Duration` or rounds down to zero.
fn interval_for(rate: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(1.0 / rate)
        .ok()
        .filter(|interval| !interval.is_zero())
}

/// Broadcast configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Frames per second.
    pub frame_rate: f64,
    /// Per-client send timeout in milliseconds.
    pub send_timeout_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            frame_rate: DEFAULT_FRAME_RATE,
            send_timeout_ms: 1000,
        }
    }
}

impl StreamConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(rate) = std::env::var("FRAMECAST_FRAME_RATE") {
            if let Ok(r) = rate.parse() {
                self.frame_rate = r;
            }
        }

        if let Ok(timeout) = std::env::var("FRAMECAST_SEND_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                self.send_timeout_ms = ms;
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.frame_rate.is_finite() || self.frame_rate <= 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "frame_rate must be a positive number, got {}",
                self.frame_rate
            )));
        }
        if interval_for(self.frame_rate).is_none() {
            return Err(ConfigError::ValidationError(format!(
                "frame_rate {} gives no usable tick interval",
                self.frame_rate
            )));
        }
        if self.send_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "send_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Time between ticks.
    ///
    /// Falls back to the default rate's interval for a rate that fails
    /// validation.
    pub fn frame_interval(&self) -> Duration {
        interval_for(self.frame_rate)
            .unwrap_or_else(|| Duration::from_secs_f64(1.0 / DEFAULT_FRAME_RATE))
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

/// Key exchange configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeConfig {
    /// Time allowed for a client to send its handshake, in milliseconds.
    pub timeout_ms: u64,
    /// Largest accepted handshake frame, in bytes.
    pub max_message_size: u64,
    /// Accept v1 (chunked RSA) clients.
    pub allow_legacy: bool,
    /// Smallest accepted RSA modulus, in bits.
    pub min_modulus_bits: u64,
    /// Largest accepted RSA modulus, in bits.
    pub max_modulus_bits: u64,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        let policy = KeyPolicy::default();
        Self {
            timeout_ms: 5000,
            max_message_size: MAX_HANDSHAKE_SIZE,
            allow_legacy: true,
            min_modulus_bits: policy.min_modulus_bits,
            max_modulus_bits: policy.max_modulus_bits,
        }
    }
}

impl HandshakeConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(timeout) = std::env::var("FRAMECAST_HANDSHAKE_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                self.timeout_ms = ms;
            }
        }

        if let Ok(allow) = std::env::var("FRAMECAST_ALLOW_LEGACY") {
            self.allow_legacy = allow == "1" || allow.to_lowercase() == "true";
        }

        if let Ok(bits) = std::env::var("FRAMECAST_MIN_MODULUS_BITS") {
            if let Ok(n) = bits.parse() {
                self.min_modulus_bits = n;
            }
        }

        if let Ok(bits) = std::env::var("FRAMECAST_MAX_MODULUS_BITS") {
            if let Ok(n) = bits.parse() {
                self.max_modulus_bits = n;
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.min_modulus_bits > self.max_modulus_bits {
            return Err(ConfigError::ValidationError(format!(
                "min_modulus_bits ({}) exceeds max_modulus_bits ({})",
                self.min_modulus_bits, self.max_modulus_bits
            )));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "handshake timeout_ms must be positive".to_string(),
            ));
        }
        if self.max_message_size == 0 {
            return Err(ConfigError::ValidationError(
                "handshake max_message_size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn key_policy(&self) -> KeyPolicy {
        KeyPolicy::new(self.min_modulus_bits, self.max_modulus_bits)
    }
}

/// Kind of payload source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// The same payload every tick.
    #[default]
    Static,
    /// Successive chunks of a file.
    File,
}

/// Payload source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub kind: SourceKind,
    /// Payload for the static source.
    pub payload: String,
    /// File for the file source.
    pub path: Option<PathBuf>,
    /// Bytes per tick for the file source.
    pub chunk_size: usize,
    /// Rewind the file at end instead of ending the stream.
    pub looping: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Static,
            payload: String::from_utf8_lossy(StaticProducer::TEST_PATTERN).into_owned(),
            path: None,
            chunk_size: 64 * 1024,
            looping: false,
        }
    }
}

impl SourceConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(kind) = std::env::var("FRAMECAST_SOURCE") {
            match kind.to_lowercase().as_str() {
                "static" => self.kind = SourceKind::Static,
                "file" => self.kind = SourceKind::File,
                _ => {}
            }
        }

        if let Ok(payload) = std::env::var("FRAMECAST_SOURCE_PAYLOAD") {
            self.payload = payload;
        }

        if let Ok(path) = std::env::var("FRAMECAST_SOURCE_PATH") {
            self.path = Some(PathBuf::from(path));
        }

        if let Ok(size) = std::env::var("FRAMECAST_SOURCE_CHUNK_SIZE") {
            if let Ok(n) = size.parse() {
                self.chunk_size = n;
            }
        }

        if let Ok(looping) = std::env::var("FRAMECAST_SOURCE_LOOP") {
            self.looping = looping == "1" || looping.to_lowercase() == "true";
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.kind == SourceKind::File {
            if self.path.is_none() {
                return Err(ConfigError::ValidationError(
                    "file source selected but path not set".to_string(),
                ));
            }
            if self.chunk_size == 0 {
                return Err(ConfigError::ValidationError(
                    "chunk_size must be positive".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Opens the configured producer.
    pub async fn open(&self) -> Result<SourceProducer, ProducerError> {
        match self.kind {
            SourceKind::Static => Ok(StaticProducer::new(Bytes::from(self.payload.clone())).into()),
            SourceKind::File => {
                let path = self
                    .path
                    .as_ref()
                    .ok_or_else(|| ProducerError::Invalid("no file path configured".into()))?;
                Ok(FileChunkProducer::open(path, self.chunk_size, self.looping)
                    .await?
                    .into())
            }
        }
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable metrics HTTP server.
    pub enabled: bool,
    /// Address to bind the metrics server to.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9090)),
        }
    }
}

impl MetricsConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(enabled) = std::env::var("FRAMECAST_METRICS_ENABLED") {
            self.enabled = enabled == "1" || enabled.to_lowercase() == "true";
        }
        if let Ok(addr) = std::env::var("FRAMECAST_METRICS_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind_addr = parsed;
            }
        }
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Custom serde module for SocketAddr (to handle as string in YAML).
mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S>(addr: &SocketAddr, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.network.bind_addr.port(), 9999);
        assert!(config.network.bind_addr.ip().is_unspecified());
        assert_eq!(config.stream.frame_interval(), Duration::from_secs_f64(1.0 / 30.0));
        assert_eq!(config.handshake.key_policy(), KeyPolicy::default());
        assert_eq!(config.source.kind, SourceKind::Static);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml() {
        let config = Config::from_yaml(
            r#"
network:
  bind_addr: "127.0.0.1:7000"
stream:
  frame_rate: 5
handshake:
  min_modulus_bits: 512
source:
  kind: file
  path: /tmp/video.raw
  looping: true
"#,
        )
        .unwrap();

        assert_eq!(config.network.bind_addr.port(), 7000);
        assert_eq!(config.network.max_connections, 1000);
        assert_eq!(config.stream.frame_interval().as_millis(), 200);
        assert_eq!(config.stream.send_timeout(), Duration::from_secs(1));
        assert_eq!(config.handshake.key_policy().min_modulus_bits, 512);
        assert_eq!(config.source.kind, SourceKind::File);
        assert!(config.source.looping);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_errors() {
        let mut config = Config::default();
        config.stream.frame_rate = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));

        let mut config = Config::default();
        config.handshake.min_modulus_bits = 4096;
        config.handshake.max_modulus_bits = 2048;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.source.kind = SourceKind::File;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.network.max_connections = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_extreme_frame_rates_rejected() {
        // Interval too long to represent.
        let config = Config::from_yaml("stream:\n  frame_rate: 1.0e-30\n").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
        assert_eq!(config.stream.frame_interval(), Duration::from_secs_f64(1.0 / 30.0));

        // Interval rounds down to zero.
        let config = Config::from_yaml("stream:\n  frame_rate: 1.0e12\n").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
        assert!(!config.stream.frame_interval().is_zero());

        // Fast but representable.
        let config = Config::from_yaml("stream:\n  frame_rate: 1000\n").unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.stream.frame_interval(), Duration::from_millis(1));
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("framecast.yaml");

        let mut config = Config::default();
        config.stream.frame_rate = 12.5;
        config.metrics.enabled = true;
        config.save(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.stream.frame_rate, 12.5);
        assert!(loaded.metrics.enabled);
        assert_eq!(loaded.network.bind_addr, config.network.bind_addr);
    }

    #[test]
    fn test_bad_file() {
        let dir = TempDir::new().unwrap();
        let missing = Config::from_file(dir.path().join("missing.yaml"));
        assert!(matches!(missing, Err(ConfigError::IoError(..))));

        let path = dir.path().join("bad.yaml");
        std::fs::write(&path, "network:\n  bind_addr: not-an-address\n").unwrap();
        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(ref p, _) if p == &path));
    }

    #[tokio::test]
    async fn test_open_static_source() {
        use crate::producer::PayloadProducer;

        let mut producer = SourceConfig::default().open().await.unwrap();
        let payload = producer.next().await.unwrap().unwrap();
        assert_eq!(payload.as_ref(), b"0123456789");
    }
}
