// Envelope benchmarks for the Cipherpost protocol.
//
// Covers X25519 key generation, envelope build and open at several payload
// sizes, and rejection of a tampered envelope.

use chrono::Utc;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use cipherpost_protocol::config::ProtocolConfig;
use cipherpost_protocol::crypto::keys::PrivateKey;
use cipherpost_protocol::envelope::Envelope;

fn payload(size: usize) -> serde_json::Value {
    serde_json::json!({ "email": "alice@example.com", "blob": "x".repeat(size) })
}

fn bench_keypair_generation(c: &mut Criterion) {
    c.bench_function("x25519/keypair_generate", |b| {
        b.iter(PrivateKey::generate);
    });
}

fn bench_build(c: &mut Criterion) {
    let sender = PrivateKey::generate();
    let sender_public = sender.public();
    let recipient = PrivateKey::generate().public();
    let mut group = c.benchmark_group("envelope/build");

    for size in [64, 1024, 16 * 1024] {
        let body = payload(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &body, |b, body| {
            b.iter(|| {
                Envelope::build("bench", body, &sender, &sender_public, &recipient, Utc::now())
                    .unwrap()
            });
        });
    }

    group.finish();
}

fn bench_open(c: &mut Criterion) {
    let sender = PrivateKey::generate();
    let sender_public = sender.public();
    let recipient = PrivateKey::generate();
    let config = ProtocolConfig::default();
    let mut group = c.benchmark_group("envelope/open");

    for size in [64, 1024, 16 * 1024] {
        let env = Envelope::build(
            "bench",
            &payload(size),
            &sender,
            &sender_public,
            &recipient.public(),
            Utc::now(),
        )
        .unwrap();
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &env, |b, env| {
            b.iter(|| env.open(&recipient, &sender_public, Utc::now(), &config).unwrap());
        });
    }

    group.finish();
}

fn bench_reject_tampered(c: &mut Criterion) {
    let sender = PrivateKey::generate();
    let sender_public = sender.public();
    let recipient = PrivateKey::generate();
    let config = ProtocolConfig::default();
    let mut env = Envelope::build(
        "bench",
        &payload(1024),
        &sender,
        &sender_public,
        &recipient.public(),
        Utc::now(),
    )
    .unwrap();
    env.auth_tag[0] ^= 1;

    c.bench_function("envelope/open_tampered", |b| {
        b.iter(|| env.open(&recipient, &sender_public, Utc::now(), &config).is_err());
    });
}

criterion_group!(
    benches,
    bench_keypair_generation,
    bench_build,
    bench_open,
    bench_reject_tampered,
);
criterion_main!(benches);
