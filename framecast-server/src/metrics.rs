//! Prometheus metrics for the framecast server.
//!
//! This module provides:
//! - Metrics registry with counters, gauges, and histograms
//! - HTTP server to expose metrics at `/metrics` endpoint

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Tick duration histogram buckets (in seconds).
const TICK_BUCKETS: &[f64] = &[0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 1.0];

/// Prometheus metrics for the framecast server.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// Total connections accepted.
    pub connections_total: Counter,
    /// Connections dropped at the connection limit.
    pub connections_rejected_total: Counter,
    /// Registered clients, handshaking or streaming.
    pub clients_active: Gauge,
    /// Clients with installed key material.
    pub clients_valid: Gauge,
    /// Handshakes by outcome.
    pub handshakes_total: CounterVec,
    /// Frames delivered.
    pub frames_sent_total: Counter,
    /// Framed bytes delivered.
    pub bytes_sent_total: Counter,
    /// Evictions by reason.
    pub evictions_total: CounterVec,
    /// Broadcast tick duration.
    pub tick_duration: Histogram,
}

impl Metrics {
    /// Creates a new Metrics instance with all metrics registered.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let connections_total = Counter::with_opts(Opts::new(
            "framecast_connections_total",
            "Total number of connections accepted",
        ))?;
        registry.register(Box::new(connections_total.clone()))?;

        let connections_rejected_total = Counter::with_opts(Opts::new(
            "framecast_connections_rejected_total",
            "Connections dropped because the connection limit was reached",
        ))?;
        registry.register(Box::new(connections_rejected_total.clone()))?;

        let clients_active = Gauge::with_opts(Opts::new(
            "framecast_clients_active",
            "Number of registered clients",
        ))?;
        registry.register(Box::new(clients_active.clone()))?;

        let clients_valid = Gauge::with_opts(Opts::new(
            "framecast_clients_valid",
            "Number of clients that completed key exchange",
        ))?;
        registry.register(Box::new(clients_valid.clone()))?;

        let handshakes_total = CounterVec::new(
            Opts::new("framecast_handshakes_total", "Handshakes by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(handshakes_total.clone()))?;

        let frames_sent_total = Counter::with_opts(Opts::new(
            "framecast_frames_sent_total",
            "Total frames delivered to clients",
        ))?;
        registry.register(Box::new(frames_sent_total.clone()))?;

        let bytes_sent_total = Counter::with_opts(Opts::new(
            "framecast_bytes_sent_total",
            "Total framed bytes delivered to clients",
        ))?;
        registry.register(Box::new(bytes_sent_total.clone()))?;

        let evictions_total = CounterVec::new(
            Opts::new("framecast_evictions_total", "Client evictions by reason"),
            &["reason"],
        )?;
        registry.register(Box::new(evictions_total.clone()))?;

        let tick_duration = Histogram::with_opts(
            HistogramOpts::new(
                "framecast_tick_duration_seconds",
                "Time to seal and deliver one payload to all clients",
            )
            .buckets(TICK_BUCKETS.to_vec()),
        )?;
        registry.register(Box::new(tick_duration.clone()))?;

        Ok(Self {
            registry,
            connections_total,
            connections_rejected_total,
            clients_active,
            clients_valid,
            handshakes_total,
            frames_sent_total,
            bytes_sent_total,
            evictions_total,
            tick_duration,
        })
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!("Failed to encode metrics: {}", e);
        }
        buffer
    }

    /// Returns a reference to the registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

/// Runs the HTTP metrics server.
///
/// The server listens on the given address and serves metrics at `/metrics`.
pub async fn run_metrics_server(
    addr: SocketAddr,
    metrics: Arc<Metrics>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _)) => {
                        let metrics = metrics.clone();
                        tokio::spawn(async move {
                            let io = TokioIo::new(stream);
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                async move { handle_request(req, metrics).await }
                            });
                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                tracing::debug!("Metrics connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Metrics server accept error: {}", e);
                    }
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Metrics server shutting down");
                break;
            }
        }
    }

    Ok(())
}

fn respond(status: StatusCode, content_type: &'static str, body: Bytes) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

/// Handles an HTTP request to the metrics server.
async fn handle_request<B>(
    req: Request<B>,
    metrics: Arc<Metrics>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let response = match req.uri().path() {
        "/metrics" => respond(
            StatusCode::OK,
            "text/plain; version=0.0.4; charset=utf-8",
            Bytes::from(metrics.encode()),
        ),
        "/health" | "/healthz" => respond(StatusCode::OK, "text/plain", Bytes::from("OK")),
        _ => respond(
            StatusCode::NOT_FOUND,
            "text/plain",
            Bytes::from("Not Found"),
        ),
    };

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();

        metrics.connections_total.inc();
        metrics.clients_active.set(2.0);
        metrics.clients_valid.set(1.0);
        metrics
            .handshakes_total
            .with_label_values(&["accepted"])
            .inc();
        metrics
            .evictions_total
            .with_label_values(&["send_timeout"])
            .inc();
        metrics.frames_sent_total.inc_by(3.0);
        metrics.tick_duration.observe(0.002);

        let encoded = String::from_utf8(metrics.encode()).unwrap();
        assert!(encoded.contains("framecast_connections_total 1"));
        assert!(encoded.contains("framecast_clients_valid 1"));
        assert!(encoded.contains("framecast_handshakes_total{outcome=\"accepted\"} 1"));
        assert!(encoded.contains("framecast_evictions_total{reason=\"send_timeout\"} 1"));
        assert!(encoded.contains("framecast_frames_sent_total 3"));
        assert!(encoded.contains("framecast_tick_duration_seconds"));
    }

    #[tokio::test]
    async fn test_routes() {
        let metrics = Arc::new(Metrics::new().unwrap());
        metrics.connections_total.inc();

        let ok = handle_request(
            Request::get("/metrics").body(()).unwrap(),
            metrics.clone(),
        )
        .await
        .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);

        let health = handle_request(Request::get("/health").body(()).unwrap(), metrics.clone())
            .await
            .unwrap();
        assert_eq!(health.status(), StatusCode::OK);

        let missing = handle_request(Request::get("/nope").body(()).unwrap(), metrics)
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }
}
