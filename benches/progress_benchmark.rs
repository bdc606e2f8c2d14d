//! Progress and chunk planning benchmarks

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use futures::StreamExt;
use kumo_uploadr::api::body::frames;
use kumo_uploadr::upload::progress::ProgressSink;
use kumo_uploadr::upload::{plan_chunks, ProgressAggregator};
use std::sync::Arc;
use std::time::Duration;

fn benchmark_progress_records(c: &mut Criterion) {
    let mut group = c.benchmark_group("progress_records");

    for chunks in [6usize, 64, 512].iter() {
        group.throughput(Throughput::Elements(*chunks as u64));
        group.bench_with_input(format!("{}_chunks", chunks), chunks, |b, &chunks| {
            let sink: ProgressSink = Arc::new(|update| {
                black_box(update);
            });
            let aggregator = ProgressAggregator::new(
                chunks as u64 * 1024,
                chunks,
                Duration::from_millis(200),
                sink,
            );
            b.iter(|| {
                for index in 0..chunks {
                    aggregator.record_chunk_progress(index, black_box(512));
                }
            });
        });
    }

    group.finish();
}

fn benchmark_chunk_plan(c: &mut Criterion) {
    c.bench_function("plan_chunks_10gib_10mib", |b| {
        b.iter(|| plan_chunks(black_box(10 * 1024 * 1024 * 1024), black_box(10 * 1024 * 1024)))
    });
}

fn benchmark_body_frames(c: &mut Criterion) {
    let mut group = c.benchmark_group("body_frames");
    let rt = tokio::runtime::Runtime::new().unwrap();

    for size in [64 * 1024, 1024 * 1024, 10 * 1024 * 1024].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(format!("{}_bytes", size), size, |b, &size| {
            let data = Bytes::from(vec![0u8; size]);
            b.to_async(&rt).iter(|| {
                let data = data.clone();
                async move { frames(data, 64 * 1024).count().await }
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_progress_records,
    benchmark_chunk_plan,
    benchmark_body_frames
);
criterion_main!(benches);
