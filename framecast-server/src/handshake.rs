//! Per-connection key exchange.
//!
//! A worker reads exactly one framed handshake message from the client,
//! builds a cipher from it, answers with an explicit accept or reject frame
//! and, on success, installs the cipher in the registry. Any failure evicts
//! the connection; there is no retry.

use crate::metrics::Metrics;
use crate::registry::{ClientId, ClientRegistry};
use crate::server::ServerStats;
use bytes::Bytes;
use framecast_cipher::{
    CipherError, CipherScheme, KeyPolicy, LegacyRsaCipher, PayloadCipher, PublicKey,
    ServerKeyExchange,
};
use framecast_protocol::{
    encode_frame, read_frame, HandshakeAccept, HandshakeMessage, HandshakeReply, ProtocolError,
    RejectReason,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::sync::broadcast;

/// Shared settings for handshake workers.
#[derive(Clone)]
pub struct HandshakeContext {
    pub registry: Arc<ClientRegistry>,
    pub policy: KeyPolicy,
    pub allow_legacy: bool,
    pub max_message_size: u64,
    pub timeout: Duration,
    pub stats: Arc<ServerStats>,
    pub metrics: Option<Arc<Metrics>>,
}

/// How a handshake ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    Accepted(CipherScheme),
    Rejected(RejectReason),
    /// The peer closed or errored before a complete message arrived.
    Closed,
    TimedOut,
    /// Server shutdown interrupted the handshake.
    Cancelled,
}

impl HandshakeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandshakeOutcome::Accepted(_) => "accepted",
            HandshakeOutcome::Rejected(_) => "rejected",
            HandshakeOutcome::Closed => "closed",
            HandshakeOutcome::TimedOut => "timed_out",
            HandshakeOutcome::Cancelled => "cancelled",
        }
    }
}

struct Rejection {
    reason: RejectReason,
    message: String,
}

impl Rejection {
    fn new(reason: RejectReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

impl From<ProtocolError> for Rejection {
    fn from(e: ProtocolError) -> Self {
        Rejection::new(RejectReason::from(&e), e.to_string())
    }
}

impl From<CipherError> for Rejection {
    fn from(e: CipherError) -> Self {
        let reason = match e {
            CipherError::WeakKey(_) => RejectReason::WeakKey,
            _ => RejectReason::Malformed,
        };
        Rejection::new(reason, e.to_string())
    }
}

/// Turns a raw handshake message into a cipher and the matching accept reply.
fn negotiate(
    raw: &[u8],
    ctx: &HandshakeContext,
) -> Result<(Arc<dyn PayloadCipher>, HandshakeAccept), Rejection> {
    match HandshakeMessage::parse(raw)? {
        HandshakeMessage::LegacyRsa { modulus, exponent } => {
            if !ctx.allow_legacy {
                return Err(Rejection::new(
                    RejectReason::UnsupportedVersion,
                    "legacy key exchange is disabled",
                ));
            }
            let key = PublicKey::from_le_bytes(&modulus, &exponent)?;
            ctx.policy.validate(&key)?;
            Ok((
                Arc::new(LegacyRsaCipher::new(key)),
                HandshakeAccept::LegacyRsa,
            ))
        }
        HandshakeMessage::EcdhP256 { public_key } => {
            let exchange = ServerKeyExchange::accept(&public_key)?;
            let accept = HandshakeAccept::EcdhP256 {
                server_public_key: Bytes::from(exchange.public_key),
                salt: exchange.salt,
            };
            Ok((Arc::new(exchange.session), accept))
        }
    }
}

/// Runs the handshake for one registered connection.
///
/// `reader` is the read half of the client's socket; the write half lives
/// in the registry entry.
pub async fn run_handshake<R>(
    id: ClientId,
    mut reader: R,
    ctx: &HandshakeContext,
    shutdown: &mut broadcast::Receiver<()>,
) -> HandshakeOutcome
where
    R: AsyncRead + Unpin,
{
    let outcome = tokio::select! {
        outcome = exchange(id, &mut reader, ctx) => outcome,
        _ = shutdown.recv() => {
            tracing::debug!("[{}] Handshake cancelled by shutdown", id);
            HandshakeOutcome::Cancelled
        }
    };

    match outcome {
        HandshakeOutcome::Accepted(scheme) => {
            ctx.stats.handshakes_accepted.fetch_add(1, Ordering::Relaxed);
            tracing::info!("[{}] Key exchange complete ({})", id, scheme);
        }
        HandshakeOutcome::Cancelled => {}
        other => {
            ctx.stats.handshakes_failed.fetch_add(1, Ordering::Relaxed);
            if ctx.registry.evict(id).await {
                ctx.stats.evictions.fetch_add(1, Ordering::Relaxed);
                if let Some(ref metrics) = ctx.metrics {
                    metrics.evictions_total.with_label_values(&["handshake"]).inc();
                    metrics.clients_active.set(ctx.registry.len() as f64);
                }
            }
            tracing::info!("[{}] Handshake failed: {}", id, other.as_str());
        }
    }

    if let Some(ref metrics) = ctx.metrics {
        metrics
            .handshakes_total
            .with_label_values(&[outcome.as_str()])
            .inc();
    }

    outcome
}

async fn exchange<R>(id: ClientId, reader: &mut R, ctx: &HandshakeContext) -> HandshakeOutcome
where
    R: AsyncRead + Unpin,
{
    let Some(entry) = ctx.registry.get(id) else {
        return HandshakeOutcome::Closed;
    };

    let raw = match tokio::time::timeout(ctx.timeout, read_frame(reader, ctx.max_message_size))
        .await
    {
        Err(_) => {
            tracing::debug!("[{}] No handshake within {:?}", id, ctx.timeout);
            return HandshakeOutcome::TimedOut;
        }
        Ok(Ok(raw)) => raw,
        Ok(Err(e @ ProtocolError::FrameTooLarge { .. })) => {
            let rejection = Rejection::from(e);
            return reject(id, &entry.connection, rejection).await;
        }
        Ok(Err(e)) => {
            tracing::debug!("[{}] Handshake read failed: {}", id, e);
            return HandshakeOutcome::Closed;
        }
    };

    let (cipher, accept) = match negotiate(&raw, ctx) {
        Ok(negotiated) => negotiated,
        Err(rejection) => return reject(id, &entry.connection, rejection).await,
    };

    let scheme = cipher.scheme();
    let reply = HandshakeReply::Accepted(accept).encode();
    let sent = match encode_frame(&reply) {
        Ok(frame) => entry.connection.send(&frame).await,
        Err(e) => Err(e.into()),
    };
    if let Err(e) = sent {
        tracing::debug!("[{}] Failed to send handshake reply: {}", id, e);
        return HandshakeOutcome::Closed;
    }

    // The accept reply must be on the wire before the first data frame.
    if ctx.registry.install_key(id, cipher) {
        HandshakeOutcome::Accepted(scheme)
    } else {
        HandshakeOutcome::Closed
    }
}

async fn reject(
    id: ClientId,
    connection: &crate::registry::ClientConnection,
    rejection: Rejection,
) -> HandshakeOutcome {
    tracing::warn!(
        "[{}] Rejecting handshake ({}): {}",
        id,
        rejection.reason.as_str(),
        rejection.message
    );
    let reply = HandshakeReply::rejected(rejection.reason, rejection.message).encode();
    if let Ok(frame) = encode_frame(&reply) {
        if let Err(e) = connection.send(&frame).await {
            tracing::debug!("[{}] Failed to send rejection: {}", id, e);
        }
    }
    HandshakeOutcome::Rejected(rejection.reason)
}
