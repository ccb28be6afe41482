//! Replication benchmarks across topologies.

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use recliner_bench::fill;
use recliner_replication::ReplicationConfig;
use recliner_testkit::ReplicationHarness;

const SIZES: [usize; 2] = [100, 1000];

fn harness_with(size: usize) -> ReplicationHarness {
    let h = ReplicationHarness::with_config(ReplicationConfig::default().with_bulk_doc_limit(100));
    let source = h.local.create_database("source").unwrap();
    fill(&source, size);
    let remote_source = h.remote.create_database("source").unwrap();
    fill(&remote_source, size);
    h
}

/// Benchmark a first full copy between local databases.
fn bench_local_to_local(c: &mut Criterion) {
    let mut group = c.benchmark_group("replicate_l2l");

    for size in SIZES.iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter_batched(
                || harness_with(size),
                |h| {
                    h.replicate(h.local_url("source"), h.local_url("target"))
                        .unwrap()
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

/// Benchmark a first full pull over the loopback client.
fn bench_remote_to_local(c: &mut Criterion) {
    let mut group = c.benchmark_group("replicate_r2l");

    for size in SIZES.iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter_batched(
                || harness_with(size),
                |h| {
                    h.replicate(h.remote_url("source"), h.local_url("target"))
                        .unwrap()
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

/// Benchmark a rerun with nothing new to copy.
fn bench_up_to_date(c: &mut Criterion) {
    let mut group = c.benchmark_group("replicate_noop");

    for size in SIZES.iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let h = harness_with(size);
            h.replicate(h.local_url("source"), h.local_url("target"))
                .unwrap();
            b.iter(|| {
                h.replicate(h.local_url("source"), h.local_url("target"))
                    .unwrap()
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_local_to_local,
    bench_remote_to_local,
    bench_up_to_date
);
criterion_main!(benches);
