//! Fan-out benchmarks for the hub.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use courier_core::{Connection, Hub, OutboundReceiver, TopicKey, TopicKind};
use courier_protocol::{codec, EventType};
use serde_json::json;
use std::time::Instant;

fn setup(subscribers: usize) -> (Hub, Vec<OutboundReceiver>) {
    let hub = Hub::new();
    let mut receivers = Vec::with_capacity(subscribers);
    for i in 0..subscribers {
        let (connection, rx) = Connection::with_capacity(format!("user-{i}"), 1024);
        let id = hub.register(connection);
        hub.subscribe(&id, TopicKind::Channel, "general");
        receivers.push(rx);
    }
    (hub, receivers)
}

fn bench_broadcast_to_topic(c: &mut Criterion) {
    let payload = codec::encode_event(EventType::ChannelMessage, &json!({"content": "hello"})).unwrap();
    let topic = TopicKey::channel("general");

    let mut group = c.benchmark_group("broadcast_to_topic");
    for subscribers in [1, 10, 100, 1000] {
        group.throughput(Throughput::Elements(subscribers as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(subscribers),
            &subscribers,
            |b, &subscribers| {
                b.iter_custom(|iters| {
                    let (hub, mut receivers) = setup(subscribers);
                    let start = Instant::now();
                    for _ in 0..iters {
                        hub.broadcast_to_topic(black_box(&topic), payload.clone());
                        for rx in &mut receivers {
                            while rx.try_recv().is_ok() {}
                        }
                    }
                    start.elapsed()
                });
            },
        );
    }
    group.finish();
}

fn bench_register_unregister(c: &mut Criterion) {
    let (hub, _receivers) = setup(100);

    c.bench_function("register_unregister", |b| {
        b.iter(|| {
            let (connection, rx) = Connection::with_capacity("bench-user", 16);
            let id = hub.register(connection);
            hub.unregister(black_box(&id));
            drop(rx);
        })
    });
}

criterion_group!(benches, bench_broadcast_to_topic, bench_register_unregister);
criterion_main!(benches);
