//! framecast - Encrypted frame streaming server
//!
//! Accepts TCP clients, negotiates a per-client key, and streams
//! encrypted payloads to every handshaken client at a fixed rate.

use framecast_server::{run_metrics_server, Config, Metrics, Server, ServerConfig};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if FRAMECAST_CONFIG is set, then env overrides)
    let config_path = std::env::var("FRAMECAST_CONFIG").ok();
    let config = match Config::load() {
        Ok(c) => {
            if let Some(path) = &config_path {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            // If a config file was explicitly specified, fail on error
            if config_path.is_some() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::info!("Using default configuration");
            Config::default()
        }
    };

    tracing::info!("Starting framecast server");
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    tracing::info!(
        "  Frame rate: {} fps ({:?} interval)",
        config.stream.frame_rate,
        config.stream.frame_interval()
    );
    tracing::info!("  Source: {:?}", config.source.kind);
    if config.handshake.allow_legacy {
        tracing::info!(
            "  Legacy key exchange: enabled ({}..={} bit moduli)",
            config.handshake.min_modulus_bits,
            config.handshake.max_modulus_bits
        );
    } else {
        tracing::info!("  Legacy key exchange: disabled");
    }

    let mut server_config = ServerConfig::from_config(&config);

    let metrics = if config.metrics.enabled {
        let metrics = Arc::new(Metrics::new()?);
        server_config = server_config.with_metrics(metrics.clone());
        Some(metrics)
    } else {
        None
    };

    let producer = config.source.open().await.map_err(|e| {
        tracing::error!("Failed to open payload source: {}", e);
        e
    })?;

    let server = Server::new(server_config);

    if let Some(metrics) = metrics {
        let addr = config.metrics.bind_addr;
        let shutdown_rx = server.shutdown_handle().subscribe();
        tokio::spawn(async move {
            if let Err(e) = run_metrics_server(addr, metrics, shutdown_rx).await {
                tracing::error!("Metrics server error: {}", e);
            }
        });
    }

    // Spawn shutdown signal handler
    let shutdown_tx = server.shutdown_handle();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping server...");
        let _ = shutdown_tx.send(());
    });

    // Run server (blocks until shutdown or the source runs dry)
    server.run(producer).await?;

    tracing::info!("Server stopped");
    Ok(())
}
