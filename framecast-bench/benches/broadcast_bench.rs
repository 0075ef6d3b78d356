//! Broadcast fan-out benchmarks.

use bytes::Bytes;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use framecast_cipher::{ClientKeyExchange, PayloadCipher, ServerKeyExchange};
use framecast_server::{Broadcaster, ClientConnection, ClientRegistry};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

fn populated_registry(clients: usize) -> Arc<ClientRegistry> {
    let registry = Arc::new(ClientRegistry::new());
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();

    for _ in 0..clients {
        let conn = Arc::new(ClientConnection::new(tokio::io::sink()));
        let id = registry.register(addr, conn);

        let exchange = ClientKeyExchange::new();
        let server = ServerKeyExchange::accept(exchange.public_key()).unwrap();
        let cipher: Arc<dyn PayloadCipher> = Arc::new(server.session);
        registry.install_key(id, cipher);
    }

    registry
}

fn bench_broadcast_tick(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("broadcast_tick");

    let payload = Bytes::from(vec![0x42u8; 64 * 1024]);

    for clients in [1, 16, 128] {
        let registry = populated_registry(clients);
        let broadcaster = Broadcaster::new(registry, Duration::from_secs(1));

        group.throughput(Throughput::Bytes((payload.len() * clients) as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(clients),
            &clients,
            |b, &clients| {
                b.to_async(&rt).iter(|| async {
                    let report = broadcaster.broadcast(&payload).await;
                    assert_eq!(report.delivered, clients);
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_broadcast_tick);
criterion_main!(benches);
