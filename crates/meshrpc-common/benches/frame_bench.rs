// Criterion benchmarks for meshrpc-common frame codec
//
// Run benchmarks with:
//   cargo bench -p meshrpc-common
//
// For detailed output with plots:
//   cargo bench -p meshrpc-common -- --save-baseline main

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use meshrpc_common::protocol::Reassembler;
use meshrpc_common::transport::FrameCodec;

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_encode");
    let codec = FrameCodec::tcp();

    for size in [64usize, 1430, 16 * 1024, 256 * 1024] {
        let payload = vec![0xabu8; size];
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            b.iter(|| {
                let frames = codec
                    .encode_request(black_box(payload), black_box(4242), black_box(120))
                    .unwrap();
                codec.recycle(frames);
            });
        });
    }

    group.finish();
}

fn bench_decode_and_reassemble(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_reassemble");
    let codec = FrameCodec::tcp();

    for size in [64usize, 16 * 1024, 256 * 1024] {
        let frames = codec.encode_request(&vec![0x5au8; size], 4242, 120).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(size), &frames, |b, frames| {
            b.iter(|| {
                let mut reassembler = Reassembler::new();
                let mut out = None;
                for frame in frames.iter() {
                    let view = codec.decode(black_box(frame)).unwrap();
                    if let Some(message) = reassembler.accept(&view).unwrap() {
                        out = Some(message);
                    }
                }
                out
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode_and_reassemble);
criterion_main!(benches);
