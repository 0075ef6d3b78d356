//! Connection management.

use crate::error::ClientError;
use bytes::Bytes;
use framecast_cipher::{
    chunk_decrypt, CipherScheme, ClientKeyExchange, EcdhSession, PrivateKey, PublicKey,
};
use framecast_protocol::{
    write_frame, Decoder, HandshakeAccept, HandshakeMessage, HandshakeReply, MAX_PAYLOAD_SIZE,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Key exchange the client offers.
#[derive(Debug, Clone, Default)]
pub enum KeyExchangeMode {
    /// Ephemeral P-256 exchange with AES-256-GCM frames.
    #[default]
    Ecdh,
    /// Chunked RSA under a client-held key pair.
    Legacy {
        public: PublicKey,
        private: PrivateKey,
    },
}

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server address.
    pub addr: SocketAddr,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Time to wait for the handshake reply.
    pub handshake_timeout: Duration,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
    /// Largest frame the client accepts.
    pub max_frame_size: u64,
    /// Key exchange to perform.
    pub key_exchange: KeyExchangeMode,
}

impl ConnectionConfig {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_frame_size: MAX_PAYLOAD_SIZE,
            key_exchange: KeyExchangeMode::Ecdh,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }

    pub fn with_max_frame_size(mut self, size: u64) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Uses the legacy chunked RSA exchange with the given key pair.
    pub fn with_legacy_keys(mut self, public: PublicKey, private: PrivateKey) -> Self {
        self.key_exchange = KeyExchangeMode::Legacy { public, private };
        self
    }
}

/// Undoes the server's per-client transform.
enum Decryptor {
    Legacy(PrivateKey),
    Ecdh(EcdhSession),
}

impl Decryptor {
    fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, ClientError> {
        match self {
            Decryptor::Legacy(key) => Ok(chunk_decrypt(key, sealed)?),
            Decryptor::Ecdh(session) => Ok(session.open(sealed)?),
        }
    }

    fn scheme(&self) -> CipherScheme {
        match self {
            Decryptor::Legacy(_) => CipherScheme::LegacyRsa,
            Decryptor::Ecdh(_) => CipherScheme::EcdhAesGcm,
        }
    }
}

/// A connection to a framecast server.
pub struct Connection {
    config: ConnectionConfig,
    writer: Mutex<Option<OwnedWriteHalf>>,
    reader: Mutex<Option<OwnedReadHalf>>,
    decoder: Mutex<Decoder>,
    decryptor: Mutex<Option<Decryptor>>,
    connected: AtomicBool,
}

impl Connection {
    /// Creates a new connection (not yet connected).
    pub fn new(config: ConnectionConfig) -> Self {
        let decoder = Decoder::with_limit(config.max_frame_size);
        Self {
            config,
            writer: Mutex::new(None),
            reader: Mutex::new(None),
            decoder: Mutex::new(decoder),
            decryptor: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    /// Connects and completes the key exchange.
    pub async fn connect(&self) -> Result<(), ClientError> {
        tracing::debug!("Connecting to {}...", self.config.addr);

        let tcp_stream = tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect(self.config.addr),
        )
        .await
        .map_err(|_| {
            tracing::debug!("Connection timeout");
            ClientError::Timeout
        })?
        .map_err(|e| {
            tracing::debug!("Connection failed: {}", e);
            ClientError::Io(e)
        })?;

        tcp_stream.set_nodelay(true).ok();

        let (read_half, write_half) = tcp_stream.into_split();
        *self.writer.lock().await = Some(write_half);
        *self.reader.lock().await = Some(read_half);
        self.decoder.lock().await.clear();

        tracing::debug!("Starting key exchange...");
        let decryptor = self.handshake().await?;
        tracing::debug!("Key exchange complete ({})", decryptor.scheme());
        *self.decryptor.lock().await = Some(decryptor);

        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Sends the handshake message and interprets the reply.
    async fn handshake(&self) -> Result<Decryptor, ClientError> {
        let (message, pending) = match &self.config.key_exchange {
            KeyExchangeMode::Ecdh => {
                let exchange = ClientKeyExchange::new();
                let message = HandshakeMessage::EcdhP256 {
                    public_key: Bytes::copy_from_slice(exchange.public_key()),
                };
                (message, Some(exchange))
            }
            KeyExchangeMode::Legacy { public, .. } => {
                let message = HandshakeMessage::LegacyRsa {
                    modulus: Bytes::from(public.modulus().to_bytes_le()),
                    exponent: Bytes::from(public.exponent().to_bytes_le()),
                };
                (message, None)
            }
        };

        {
            let mut writer_guard = self.writer.lock().await;
            let writer = writer_guard.as_mut().ok_or(ClientError::NotConnected)?;
            write_frame(writer, &message.encode()).await?;
        }
        tracing::debug!("Handshake sent, waiting for reply...");

        let raw = tokio::time::timeout(self.config.handshake_timeout, self.read_raw_frame())
            .await
            .map_err(|_| ClientError::Timeout)??;

        match (HandshakeReply::parse(&raw)?, &self.config.key_exchange, pending) {
            (HandshakeReply::Rejected { reason, message }, _, _) => {
                Err(ClientError::Rejected { reason, message })
            }
            (
                HandshakeReply::Accepted(HandshakeAccept::EcdhP256 {
                    server_public_key,
                    salt,
                }),
                KeyExchangeMode::Ecdh,
                Some(exchange),
            ) => Ok(Decryptor::Ecdh(exchange.complete(&server_public_key, &salt)?)),
            (
                HandshakeReply::Accepted(HandshakeAccept::LegacyRsa),
                KeyExchangeMode::Legacy { private, .. },
                _,
            ) => Ok(Decryptor::Legacy(private.clone())),
            (HandshakeReply::Accepted(accept), _, _) => Err(ClientError::UnexpectedReply(
                format!("server accepted with mismatched parameters: {:?}", accept),
            )),
        }
    }

    /// Reads the next complete frame without decrypting it.
    pub async fn read_raw_frame(&self) -> Result<Bytes, ClientError> {
        let mut buf = vec![0u8; self.config.read_buffer_size];

        loop {
            if let Some(frame) = self.decoder.lock().await.decode_frame()? {
                return Ok(frame.payload);
            }

            let n = {
                let mut reader_guard = self.reader.lock().await;
                let reader = reader_guard.as_mut().ok_or(ClientError::NotConnected)?;
                reader.read(&mut buf).await?
            };

            if n == 0 {
                tracing::debug!("Connection closed by server");
                self.connected.store(false, Ordering::SeqCst);
                return Err(ClientError::ConnectionClosed);
            }

            self.decoder.lock().await.extend(&buf[..n]);
        }
    }

    /// Receives and decrypts the next frame.
    ///
    /// Legacy frames keep the zero padding of their final chunk.
    pub async fn recv(&self) -> Result<Vec<u8>, ClientError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ClientError::NotConnected);
        }
        let sealed = self.read_raw_frame().await?;
        let decryptor = self.decryptor.lock().await;
        decryptor
            .as_ref()
            .ok_or(ClientError::NotConnected)?
            .open(&sealed)
    }

    /// Returns the negotiated scheme, once connected.
    pub async fn scheme(&self) -> Option<CipherScheme> {
        self.decryptor.lock().await.as_ref().map(Decryptor::scheme)
    }

    /// Returns whether the connection is established.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Closes the connection.
    pub async fn close(&self) -> Result<(), ClientError> {
        tracing::debug!("Closing connection...");
        self.connected.store(false, Ordering::SeqCst);

        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        let _ = self.reader.lock().await.take();
        let _ = self.decryptor.lock().await.take();

        Ok(())
    }
}
