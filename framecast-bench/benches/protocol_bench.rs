//! Framing and handshake encoding/decoding benchmarks.

use bytes::{Bytes, BytesMut};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use framecast_cipher::ClientKeyExchange;
use framecast_protocol::{Decoder, Frame, HandshakeMessage};

fn bench_frame_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_encode");

    for size in [100, 10_000, 1_000_000] {
        let frame = Frame::new(Bytes::from(vec![0x5au8; size]));

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &frame, |b, frame| {
            b.iter(|| black_box(frame.encode().unwrap()));
        });
    }

    group.finish();
}

fn bench_frame_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_decode");

    for size in [100, 10_000, 1_000_000] {
        let encoded = Frame::new(Bytes::from(vec![0x5au8; size])).encode().unwrap();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &encoded, |b, encoded| {
            b.iter(|| {
                let mut buf = encoded.clone();
                black_box(Frame::decode(&mut buf).unwrap())
            });
        });
    }

    group.finish();
}

fn bench_streaming_decoder(c: &mut Criterion) {
    let mut group = c.benchmark_group("streaming_decoder");

    // 64 frames delivered in 1 KiB reads.
    let mut stream = BytesMut::new();
    for _ in 0..64 {
        stream.extend_from_slice(&Frame::new(Bytes::from(vec![1u8; 4096])).encode().unwrap());
    }
    let stream = stream.freeze();

    group.throughput(Throughput::Bytes(stream.len() as u64));
    group.bench_function("64x4096_in_1k_reads", |b| {
        b.iter(|| {
            let mut decoder = Decoder::new();
            let mut frames = 0;
            for chunk in stream.chunks(1024) {
                decoder.extend(chunk);
                while let Some(frame) = decoder.decode_frame().unwrap() {
                    black_box(&frame);
                    frames += 1;
                }
            }
            assert_eq!(frames, 64);
        });
    });

    group.finish();
}

fn bench_handshake_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("handshake_parse");

    let modulus = vec![0xffu8; 256];
    let legacy = HandshakeMessage::LegacyRsa {
        modulus: Bytes::from(modulus),
        exponent: Bytes::from_static(&[0x01, 0x00, 0x01]),
    }
    .encode();
    group.bench_function("legacy_rsa_2048", |b| {
        b.iter(|| black_box(HandshakeMessage::parse(&legacy).unwrap()));
    });

    let exchange = ClientKeyExchange::new();
    let ecdh = HandshakeMessage::EcdhP256 {
        public_key: Bytes::copy_from_slice(exchange.public_key()),
    }
    .encode();
    group.bench_function("ecdh_p256", |b| {
        b.iter(|| black_box(HandshakeMessage::parse(&ecdh).unwrap()));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_frame_encode,
    bench_frame_decode,
    bench_streaming_decoder,
    bench_handshake_parse,
);
criterion_main!(benches);
