//! Codec benchmarks for courier-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use courier_protocol::{codec, EventType};
use serde_json::json;

fn bench_encode_event(c: &mut Criterion) {
    let data = json!({
        "channelId": "general",
        "serverId": "s-1",
        "message": {"id": "m-1", "content": "x".repeat(256)}
    });

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Elements(1));
    group.bench_function("channel_message_256B", |b| {
        b.iter(|| codec::encode_event(EventType::ChannelMessage, black_box(&data)))
    });
    group.finish();
}

fn bench_decode_client_frame(c: &mut Criterion) {
    let raw = br#"{"type":"subscribe","data":{"subscriptions":[{"type":"channel","id":"general"},{"type":"conversation","id":"c-1"}]}}"#;

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(raw.len() as u64));
    group.bench_function("subscribe_frame", |b| {
        b.iter(|| codec::decode_client_frame(black_box(raw)))
    });
    group.finish();
}

criterion_group!(benches, bench_encode_event, bench_decode_client_frame);
criterion_main!(benches);
