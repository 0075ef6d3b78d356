//! Payload producers.
//!
//! The broadcaster pulls one payload per tick. `Ok(None)` marks the end of
//! the stream.

use bytes::{Bytes, BytesMut};
use std::future::Future;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;

/// Payload source errors.
#[derive(Debug, Error)]
pub enum ProducerError {
    #[error("failed to open payload source '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read payload source: {0}")]
    Read(#[from] std::io::Error),

    #[error("invalid payload source: {0}")]
    Invalid(String),
}

/// Supplies the payload for each broadcast tick.
pub trait PayloadProducer: Send {
    /// Returns the next payload, or `None` once the stream has ended.
    fn next(&mut self) -> impl Future<Output = Result<Option<Bytes>, ProducerError>> + Send;
}

/// Repeats one fixed payload.
#[derive(Debug, Clone)]
pub struct StaticProducer {
    payload: Bytes,
    remaining: Option<u64>,
}

impl StaticProducer {
    /// Test pattern used when no source is configured.
    pub const TEST_PATTERN: &'static [u8] = b"0123456789";

    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            remaining: None,
        }
    }

    /// Ends the stream after `count` payloads.
    pub fn with_limit(mut self, count: u64) -> Self {
        self.remaining = Some(count);
        self
    }
}

impl Default for StaticProducer {
    fn default() -> Self {
        Self::new(Bytes::from_static(Self::TEST_PATTERN))
    }
}

impl PayloadProducer for StaticProducer {
    async fn next(&mut self) -> Result<Option<Bytes>, ProducerError> {
        match self.remaining.as_mut() {
            Some(0) => Ok(None),
            Some(n) => {
                *n -= 1;
                Ok(Some(self.payload.clone()))
            }
            None => Ok(Some(self.payload.clone())),
        }
    }
}

/// Reads a file in fixed-size chunks, one chunk per tick.
///
/// The final chunk may be short. With `looping` set the file is rewound at
/// end of file instead of ending the stream.
#[derive(Debug)]
pub struct FileChunkProducer {
    file: File,
    path: PathBuf,
    chunk_size: usize,
    looping: bool,
}

impl FileChunkProducer {
    pub async fn open(
        path: impl AsRef<Path>,
        chunk_size: usize,
        looping: bool,
    ) -> Result<Self, ProducerError> {
        if chunk_size == 0 {
            return Err(ProducerError::Invalid("chunk size must be positive".into()));
        }
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)
            .await
            .map_err(|source| ProducerError::Open {
                path: path.clone(),
                source,
            })?;
        Ok(Self {
            file,
            path,
            chunk_size,
            looping,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_chunk(&mut self) -> Result<Bytes, ProducerError> {
        let mut buf = BytesMut::with_capacity(self.chunk_size);
        while buf.len() < self.chunk_size {
            let limit = self.chunk_size - buf.len();
            let n = (&mut self.file).take(limit as u64).read_buf(&mut buf).await?;
            if n == 0 {
                break;
            }
        }
        Ok(buf.freeze())
    }
}

impl PayloadProducer for FileChunkProducer {
    async fn next(&mut self) -> Result<Option<Bytes>, ProducerError> {
        let chunk = self.read_chunk().await?;
        if !chunk.is_empty() {
            return Ok(Some(chunk));
        }
        if !self.looping {
            return Ok(None);
        }

        tracing::debug!("Rewinding {}", self.path.display());
        self.file.seek(SeekFrom::Start(0)).await?;
        let chunk = self.read_chunk().await?;
        // An empty file has nothing to loop over.
        Ok(if chunk.is_empty() { None } else { Some(chunk) })
    }
}

/// Forwards payloads pushed through an mpsc channel.
///
/// The stream ends once every sender has been dropped.
#[derive(Debug)]
pub struct ChannelProducer {
    rx: mpsc::Receiver<Bytes>,
}

impl ChannelProducer {
    pub fn new(rx: mpsc::Receiver<Bytes>) -> Self {
        Self { rx }
    }

    /// Creates a bounded channel and the producer reading from it.
    pub fn channel(capacity: usize) -> (mpsc::Sender<Bytes>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(rx))
    }
}

impl PayloadProducer for ChannelProducer {
    async fn next(&mut self) -> Result<Option<Bytes>, ProducerError> {
        Ok(self.rx.recv().await)
    }
}

/// Any of the built-in producers, chosen at runtime from configuration.
#[derive(Debug)]
pub enum SourceProducer {
    Static(StaticProducer),
    File(FileChunkProducer),
    Channel(ChannelProducer),
}

impl PayloadProducer for SourceProducer {
    async fn next(&mut self) -> Result<Option<Bytes>, ProducerError> {
        match self {
            SourceProducer::Static(p) => p.next().await,
            SourceProducer::File(p) => p.next().await,
            SourceProducer::Channel(p) => p.next().await,
        }
    }
}

impl From<StaticProducer> for SourceProducer {
    fn from(p: StaticProducer) -> Self {
        SourceProducer::Static(p)
    }
}

impl From<FileChunkProducer> for SourceProducer {
    fn from(p: FileChunkProducer) -> Self {
        SourceProducer::File(p)
    }
}

impl From<ChannelProducer> for SourceProducer {
    fn from(p: ChannelProducer) -> Self {
        SourceProducer::Channel(p)
    }
}
