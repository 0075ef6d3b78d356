//! TCP server implementation.

use crate::broadcast::{Broadcaster, StreamEnd};
use crate::config::Config;
use crate::error::ServerError;
use crate::handshake::{run_handshake, HandshakeContext};
use crate::metrics::Metrics;
use crate::producer::PayloadProducer;
use crate::registry::{ClientConnection, ClientRegistry};
use framecast_cipher::KeyPolicy;
use framecast_protocol::{DEFAULT_PORT, MAX_HANDSHAKE_SIZE};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Time between broadcast ticks.
    pub frame_interval: Duration,
    /// Per-client send timeout.
    pub send_timeout: Duration,
    /// Time allowed for the handshake message to arrive.
    pub handshake_timeout: Duration,
    /// Largest accepted handshake frame.
    pub max_handshake_size: u64,
    /// Strength requirements for legacy keys.
    pub key_policy: KeyPolicy,
    /// Whether v1 clients are accepted.
    pub allow_legacy: bool,
    /// Metrics instance (if metrics are enabled).
    pub metrics: Option<Arc<Metrics>>,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("max_connections", &self.max_connections)
            .field("frame_interval", &self.frame_interval)
            .field("send_timeout", &self.send_timeout)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("max_handshake_size", &self.max_handshake_size)
            .field("key_policy", &self.key_policy)
            .field("allow_legacy", &self.allow_legacy)
            .field("metrics_enabled", &self.metrics.is_some())
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            max_connections: 1000,
            frame_interval: Duration::from_millis(33),
            send_timeout: Duration::from_secs(1),
            handshake_timeout: Duration::from_secs(5),
            max_handshake_size: MAX_HANDSHAKE_SIZE,
            key_policy: KeyPolicy::default(),
            allow_legacy: true,
            metrics: None,
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    /// Builds server settings from loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            bind_addr: config.network.bind_addr,
            max_connections: config.network.max_connections,
            frame_interval: config.stream.frame_interval(),
            send_timeout: config.stream.send_timeout(),
            handshake_timeout: config.handshake.timeout(),
            max_handshake_size: config.handshake.max_message_size,
            key_policy: config.handshake.key_policy(),
            allow_legacy: config.handshake.allow_legacy,
            metrics: None,
        }
    }

    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_key_policy(mut self, policy: KeyPolicy) -> Self {
        self.key_policy = policy;
        self
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the metrics instance.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Returns whether metrics are enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics.is_some()
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_rejected: AtomicU64,
    pub handshakes_accepted: AtomicU64,
    pub handshakes_failed: AtomicU64,
    pub frames_delivered: AtomicU64,
    pub evictions: AtomicU64,
    pub ticks: AtomicU64,
}

/// TCP server for framecast.
pub struct Server {
    config: ServerConfig,
    registry: Arc<ClientRegistry>,
    stats: Arc<ServerStats>,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
}

impl Server {
    /// Creates a new server.
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            registry: Arc::new(ClientRegistry::new()),
            stats: Arc::new(ServerStats::default()),
            shutdown: shutdown_tx,
            running: AtomicBool::new(false),
        }
    }

    /// Binds the listening socket. Failure is fatal and not retried.
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        TcpListener::bind(self.config.bind_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.config.bind_addr,
                source,
            })
    }

    /// Binds and serves until shutdown or until `producer` is exhausted.
    pub async fn run<P>(&self, producer: P) -> Result<(), ServerError>
    where
        P: PayloadProducer + 'static,
    {
        let listener = self.bind().await?;
        self.serve(listener, producer).await
    }

    /// Serves on an already bound listener.
    pub async fn serve<P>(&self, listener: TcpListener, producer: P) -> Result<(), ServerError>
    where
        P: PayloadProducer + 'static,
    {
        self.running.store(true, Ordering::SeqCst);
        let local_addr = listener.local_addr()?;
        tracing::info!("Server listening on {}", local_addr);

        let mut broadcaster = Broadcaster::new(self.registry.clone(), self.config.send_timeout)
            .with_stats(self.stats.clone());
        if let Some(ref metrics) = self.config.metrics {
            broadcaster = broadcaster.with_metrics(metrics.clone());
        }
        let interval = self.config.frame_interval;
        let stream_shutdown = self.shutdown.subscribe();
        let mut stream_task =
            tokio::spawn(async move { broadcaster.run(producer, interval, stream_shutdown).await });

        let handshake_ctx = Arc::new(HandshakeContext {
            registry: self.registry.clone(),
            policy: self.config.key_policy,
            allow_legacy: self.config.allow_legacy,
            max_message_size: self.config.max_handshake_size,
            timeout: self.config.handshake_timeout,
            stats: self.stats.clone(),
            metrics: self.config.metrics.clone(),
        });

        let mut shutdown_rx = self.shutdown.subscribe();
        let mut stream_finished = false;
        let mut result = Ok(());

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => self.admit(stream, addr, &handshake_ctx),
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                joined = &mut stream_task, if !stream_finished => {
                    stream_finished = true;
                    match joined {
                        Ok(Ok(StreamEnd::Exhausted)) => {
                            tracing::info!("Stream ended, shutting down");
                        }
                        Ok(Ok(StreamEnd::Shutdown)) => {}
                        Ok(Err(e)) => {
                            tracing::error!("Broadcast loop failed: {}", e);
                            result = Err(e);
                        }
                        Err(e) => {
                            tracing::error!("Broadcast task failed: {}", e);
                        }
                    }
                    break;
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Server shutting down");
                    break;
                }
            }
        }

        drop(listener);
        let _ = self.shutdown.send(());
        if !stream_finished {
            if let Err(e) = stream_task.await {
                tracing::error!("Broadcast task failed: {}", e);
            }
        }

        let closed = self.registry.close_all().await;
        tracing::info!("Closed {} client connection(s)", closed);

        self.running.store(false, Ordering::SeqCst);
        result
    }

    /// Registers an accepted connection and starts its handshake.
    fn admit(&self, stream: TcpStream, addr: SocketAddr, ctx: &Arc<HandshakeContext>) {
        if self.registry.len() >= self.config.max_connections {
            tracing::warn!("Connection limit reached, rejecting {}", addr);
            self.stats
                .connections_rejected
                .fetch_add(1, Ordering::Relaxed);
            if let Some(ref metrics) = self.config.metrics {
                metrics.connections_rejected_total.inc();
            }
            return;
        }

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Failed to set TCP_NODELAY for {}: {}", addr, e);
        }
        let (reader, writer) = stream.into_split();
        let id = self
            .registry
            .register(addr, Arc::new(ClientConnection::new(writer)));

        self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
        if let Some(ref metrics) = self.config.metrics {
            metrics.connections_total.inc();
            metrics.clients_active.set(self.registry.len() as f64);
        }
        tracing::info!("Client connected: {} ({})", addr, id);

        let ctx = ctx.clone();
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            let outcome = run_handshake(id, reader, &ctx, &mut shutdown).await;
            tracing::debug!("[{}] Handshake finished: {}", id, outcome.as_str());
        });
    }

    /// Initiates server shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Returns a handle that can signal shutdown from another task.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown.clone()
    }

    /// Returns whether the server is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns the client registry.
    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    /// Returns server statistics.
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}
