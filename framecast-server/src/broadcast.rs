//! Paced fan-out of encrypted frames.
//!
//! On every tick the broadcaster pulls one payload from its producer, takes a
//! registry snapshot and sends the payload, sealed under each client's own
//! key, to every valid client concurrently. A client whose send fails or
//! stalls past the send timeout is evicted; the others are unaffected. All
//! sends of a tick finish before the next tick starts, so per-client frame
//! order follows tick order.

use crate::error::ServerError;
use crate::metrics::Metrics;
use crate::producer::PayloadProducer;
use crate::registry::{ClientConnection, ClientRegistry};
use crate::server::ServerStats;
use bytes::Bytes;
use framecast_cipher::PayloadCipher;
use framecast_protocol::encode_frame;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

/// Result of one broadcast tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Clients that received the frame.
    pub delivered: usize,
    /// Clients evicted during this tick.
    pub evicted: usize,
    /// Clients skipped because their handshake is not complete.
    pub skipped: usize,
    /// Framed bytes written across all clients.
    pub bytes_sent: u64,
}

/// Why the broadcast loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The producer has no more payloads.
    Exhausted,
    /// Shutdown was signalled.
    Shutdown,
}

/// Seals and sends payloads to registered clients.
pub struct Broadcaster {
    registry: Arc<ClientRegistry>,
    send_timeout: Duration,
    stats: Arc<ServerStats>,
    metrics: Option<Arc<Metrics>>,
}

impl Broadcaster {
    pub fn new(registry: Arc<ClientRegistry>, send_timeout: Duration) -> Self {
        Self {
            registry,
            send_timeout,
            stats: Arc::new(ServerStats::default()),
            metrics: None,
        }
    }

    pub fn with_stats(mut self, stats: Arc<ServerStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Delivers one payload to every valid client.
    pub async fn broadcast(&self, payload: &Bytes) -> TickReport {
        let started = Instant::now();
        let mut report = TickReport::default();
        let mut sends = JoinSet::new();

        for entry in self.registry.snapshot() {
            let Some(cipher) = entry.active_cipher().cloned() else {
                report.skipped += 1;
                continue;
            };
            let connection = entry.connection.clone();
            let payload = payload.clone();
            let timeout = self.send_timeout;
            let id = entry.id;
            sends.spawn(async move {
                let result = deliver(&connection, cipher.as_ref(), &payload, timeout).await;
                (id, result)
            });
        }

        while let Some(joined) = sends.join_next().await {
            match joined {
                Ok((_, Ok(bytes))) => {
                    report.delivered += 1;
                    report.bytes_sent += bytes as u64;
                }
                Ok((id, Err(e))) => {
                    tracing::warn!("[{}] Delivery failed, evicting: {}", id, e);
                    if self.registry.evict(id).await {
                        report.evicted += 1;
                        if let Some(ref metrics) = self.metrics {
                            metrics
                                .evictions_total
                                .with_label_values(&[e.eviction_reason()])
                                .inc();
                        }
                    }
                }
                Err(e) => {
                    tracing::error!("Delivery task failed: {}", e);
                }
            }
        }

        self.record(&report, started.elapsed());
        report
    }

    fn record(&self, report: &TickReport, elapsed: Duration) {
        self.stats
            .frames_delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.stats
            .evictions
            .fetch_add(report.evicted as u64, Ordering::Relaxed);
        self.stats.ticks.fetch_add(1, Ordering::Relaxed);

        if let Some(ref metrics) = self.metrics {
            metrics.frames_sent_total.inc_by(report.delivered as f64);
            metrics.bytes_sent_total.inc_by(report.bytes_sent as f64);
            metrics.tick_duration.observe(elapsed.as_secs_f64());
            metrics.clients_active.set(self.registry.len() as f64);
            metrics.clients_valid.set(self.registry.valid_count() as f64);
        }
    }

    /// Runs the paced loop until the producer ends or shutdown is signalled.
    ///
    /// Ticks that fall behind are delayed rather than sent in a burst.
    pub async fn run<P>(
        &self,
        mut producer: P,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<StreamEnd, ServerError>
    where
        P: PayloadProducer,
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!("Broadcasting every {:?}", interval);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => return Ok(StreamEnd::Shutdown),
                _ = ticker.tick() => {}
            }

            let next = tokio::select! {
                biased;
                _ = shutdown.recv() => return Ok(StreamEnd::Shutdown),
                next = producer.next() => next?,
            };

            let Some(payload) = next else {
                tracing::info!("Payload source exhausted");
                return Ok(StreamEnd::Exhausted);
            };

            let report = self.broadcast(&payload).await;
            tracing::trace!(
                "Tick: {} delivered, {} evicted, {} skipped",
                report.delivered,
                report.evicted,
                report.skipped
            );
        }
    }
}

/// Seals, frames and writes one payload. Returns the number of bytes written.
async fn deliver(
    connection: &ClientConnection,
    cipher: &dyn PayloadCipher,
    payload: &[u8],
    timeout: Duration,
) -> Result<usize, ServerError> {
    let sealed = cipher.seal(payload)?;
    let frame = encode_frame(&sealed)?;
    tokio::time::timeout(timeout, connection.send(&frame))
        .await
        .map_err(|_| ServerError::SendTimeout(timeout))??;
    Ok(frame.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producer::{ChannelProducer, StaticProducer};
    use crate::registry::ClientId;
    use framecast_cipher::{chunk_decrypt, LegacyRsaCipher, PrivateKey, PublicKey};
    use framecast_protocol::{read_frame, MAX_PAYLOAD_SIZE};
    use num_bigint::BigUint;
    use std::net::SocketAddr;
    use tokio::io::DuplexStream;

    fn toy_cipher() -> Arc<dyn PayloadCipher> {
        let key = PublicKey::new(BigUint::from(17u32), BigUint::from(3233u32)).unwrap();
        Arc::new(LegacyRsaCipher::new(key))
    }

    fn toy_private() -> PrivateKey {
        PrivateKey::new(BigUint::from(2753u32), BigUint::from(3233u32)).unwrap()
    }

    fn add_client(registry: &ClientRegistry, buffer: usize) -> (ClientId, DuplexStream) {
        let (local, remote) = tokio::io::duplex(buffer);
        let id = registry.register(
            SocketAddr::from(([127, 0, 0, 1], 0)),
            Arc::new(ClientConnection::new(local)),
        );
        (id, remote)
    }

    async fn recv_plaintext(peer: &mut DuplexStream) -> Vec<u8> {
        let frame = read_frame(peer, MAX_PAYLOAD_SIZE).await.unwrap();
        chunk_decrypt(&toy_private(), &frame).unwrap()
    }

    #[tokio::test]
    async fn test_only_valid_clients_receive() {
        let registry = Arc::new(ClientRegistry::new());
        let (keyed, mut keyed_peer) = add_client(&registry, 1024);
        let (_pending, _pending_peer) = add_client(&registry, 1024);
        registry.install_key(keyed, toy_cipher());

        let broadcaster = Broadcaster::new(registry.clone(), Duration::from_secs(1));
        let report = broadcaster.broadcast(&Bytes::from_static(b"A")).await;

        assert_eq!(report.delivered, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.evicted, 0);
        assert_eq!(report.bytes_sent, 8 + 2);
        assert_eq!(recv_plaintext(&mut keyed_peer).await, b"A");
    }

    #[tokio::test]
    async fn test_failed_client_evicted_others_served() {
        let registry = Arc::new(ClientRegistry::new());
        let (gone, gone_peer) = add_client(&registry, 1024);
        let (alive, mut alive_peer) = add_client(&registry, 1024);
        registry.install_key(gone, toy_cipher());
        registry.install_key(alive, toy_cipher());
        drop(gone_peer);

        let broadcaster = Broadcaster::new(registry.clone(), Duration::from_secs(1));
        let report = broadcaster.broadcast(&Bytes::from_static(b"hi")).await;

        assert_eq!(report.delivered, 1);
        assert_eq!(report.evicted, 1);
        assert!(registry.get(gone).is_none());
        assert!(registry.get(alive).is_some());

        let mut plaintext = recv_plaintext(&mut alive_peer).await;
        plaintext.truncate(2);
        assert_eq!(plaintext, b"hi");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_client_times_out() {
        let registry = Arc::new(ClientRegistry::new());
        // Room for less than one frame and nobody reading.
        let (stalled, _stalled_peer) = add_client(&registry, 4);
        let (fast, mut fast_peer) = add_client(&registry, 1024);
        registry.install_key(stalled, toy_cipher());
        registry.install_key(fast, toy_cipher());

        let broadcaster = Broadcaster::new(registry.clone(), Duration::from_millis(50));
        let report = broadcaster.broadcast(&Bytes::from_static(b"A")).await;

        assert_eq!(report.delivered, 1);
        assert_eq!(report.evicted, 1);
        assert!(registry.get(stalled).is_none());
        assert_eq!(recv_plaintext(&mut fast_peer).await, b"A");
    }

    #[tokio::test]
    async fn test_empty_payload_sends_empty_frame() {
        let registry = Arc::new(ClientRegistry::new());
        let (id, mut peer) = add_client(&registry, 1024);
        registry.install_key(id, toy_cipher());

        let broadcaster = Broadcaster::new(registry, Duration::from_secs(1));
        let report = broadcaster.broadcast(&Bytes::new()).await;

        assert_eq!(report.delivered, 1);
        let frame = read_frame(&mut peer, MAX_PAYLOAD_SIZE).await.unwrap();
        assert!(frame.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_exhausted_in_order() {
        let registry = Arc::new(ClientRegistry::new());
        let (id, mut peer) = add_client(&registry, 4096);
        registry.install_key(id, toy_cipher());

        let (tx, producer) = ChannelProducer::channel(8);
        for byte in [b"1", b"2", b"3"] {
            tx.send(Bytes::from_static(byte)).await.unwrap();
        }
        drop(tx);

        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let broadcaster = Broadcaster::new(registry, Duration::from_secs(1));
        let end = broadcaster
            .run(producer, Duration::from_millis(10), shutdown_rx)
            .await
            .unwrap();

        assert_eq!(end, StreamEnd::Exhausted);
        for expected in [b"1", b"2", b"3"] {
            assert_eq!(recv_plaintext(&mut peer).await, expected);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let registry = Arc::new(ClientRegistry::new());
        let stats = Arc::new(ServerStats::default());
        let broadcaster =
            Broadcaster::new(registry, Duration::from_secs(1)).with_stats(stats.clone());

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(async move {
            broadcaster
                .run(StaticProducer::default(), Duration::from_millis(10), shutdown_rx)
                .await
        });

        tokio::time::sleep(Duration::from_millis(55)).await;
        shutdown_tx.send(()).unwrap();

        assert_eq!(handle.await.unwrap().unwrap(), StreamEnd::Shutdown);
        assert!(stats.ticks.load(Ordering::Relaxed) >= 5);
    }
}
