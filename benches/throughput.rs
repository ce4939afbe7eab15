//! Throughput Benchmark for FlashMux
//!
//! This benchmark measures the request scanner and the reply relay
//! with in-memory sources and sinks, so only the wire handling is timed.

use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use flashmux::protocol::{get_command, CommandClass, MessageStreamer};
use tokio::runtime::Runtime;

fn bulk_reply(len: usize) -> Vec<u8> {
    let mut reply = format!("${}\r\n", len).into_bytes();
    reply.extend(std::iter::repeat(b'x').take(len));
    reply.extend_from_slice(b"\r\n");
    reply
}

fn multi_bulk_reply(elements: usize, element_len: usize) -> Vec<u8> {
    let mut reply = format!("*{}\r\n", elements).into_bytes();
    for _ in 0..elements {
        reply.extend_from_slice(&bulk_reply(element_len));
    }
    reply
}

/// Benchmark request scanning
fn bench_get_command(c: &mut Criterion) {
    let mut group = c.benchmark_group("get_command");
    group.throughput(Throughput::Elements(1));

    group.bench_function("with_argument", |b| {
        let request = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n$8\r\nuser:123\r\n"[..]);
        b.iter(|| {
            let mut buffer = request.clone();
            let command = get_command(&mut buffer).unwrap();
            black_box(command.first_argument);
        });
    });

    group.bench_function("classify", |b| {
        let request = BytesMut::from(&b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n"[..]);
        b.iter(|| {
            let mut buffer = request.clone();
            let command = get_command(&mut buffer).unwrap();
            black_box(command.class() == CommandClass::Proxyable);
        });
    });

    group.finish();
}

/// Benchmark relaying replies into a sink
fn bench_copy_server_response(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let mut group = c.benchmark_group("copy_server_response");

    for (name, reply) in [
        ("simple_string", b"+OK\r\n".to_vec()),
        ("bulk_small", bulk_reply(16)),
        ("bulk_64k", bulk_reply(64 * 1024)),
        ("multi_bulk_100", multi_bulk_reply(100, 32)),
    ] {
        group.throughput(Throughput::Bytes(reply.len() as u64));
        group.bench_function(name, |b| {
            let mut streamer = MessageStreamer::new();
            b.iter(|| {
                runtime.block_on(async {
                    let mut remote = &reply[..];
                    let mut local = tokio::io::sink();
                    streamer.copy_server_response(&mut remote, &mut local).await.unwrap();
                });
            });
        });
    }

    group.finish();
}

/// Benchmark discarding replies
fn bench_ignore(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let mut group = c.benchmark_group("ignore");

    let reply = multi_bulk_reply(100, 256);
    let body = reply[b"*100\r\n".len()..].to_vec();
    group.throughput(Throughput::Bytes(reply.len() as u64));

    group.bench_function("multi_bulk_100", |b| {
        let mut streamer = MessageStreamer::new();
        b.iter(|| {
            runtime.block_on(async {
                let mut remote = &body[..];
                streamer.ignore_multi_bulk_message(b"*100", &mut remote).await.unwrap();
            });
        });
    });

    group.finish();
}

criterion_group!(benches, bench_get_command, bench_copy_server_response, bench_ignore);

criterion_main!(benches);
