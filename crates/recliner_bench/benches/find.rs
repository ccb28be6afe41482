//! Query benchmarks: full scans against index-narrowed plans.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use recliner_bench::fill;
use recliner_codec::value;
use recliner_core::{FindQuery, IndexRequest};
use recliner_testkit::TestDatabase;

const SIZES: [usize; 3] = [100, 1000, 5000];

/// Benchmark a range query with no usable index.
fn bench_find_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("find_scan");

    for size in SIZES.iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let db = TestDatabase::memory();
            fill(&db, size);
            let query =
                FindQuery::new(value!({"age": {"$gte": 30}, "score": {"$lt": 50}})).limit(50);
            b.iter(|| db.find(black_box(&query)).unwrap());
        });
    }
    group.finish();
}

/// Benchmark the same query once `age` is indexed.
fn bench_find_indexed(c: &mut Criterion) {
    let mut group = c.benchmark_group("find_indexed");

    for size in SIZES.iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let db = TestDatabase::memory();
            fill(&db, size);
            db.create_index(&IndexRequest::on(["age"]).ddoc("bench"))
                .unwrap();
            let query =
                FindQuery::new(value!({"age": {"$gte": 30}, "score": {"$lt": 50}})).limit(50);
            b.iter(|| db.find(black_box(&query)).unwrap());
        });
    }
    group.finish();
}

/// Benchmark a sorted query that pages through results with bookmarks.
fn bench_find_sorted_pages(c: &mut Criterion) {
    let mut group = c.benchmark_group("find_sorted_pages");

    for size in SIZES.iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let db = TestDatabase::memory();
            fill(&db, size);
            db.create_index(&IndexRequest::on(["age"]).ddoc("bench"))
                .unwrap();
            b.iter(|| {
                let mut query = FindQuery::new(value!({"age": {"$gt": 20}}))
                    .sort(value!([{"age": "asc"}]))
                    .limit(100);
                let mut pages = 0;
                loop {
                    let result = db.find(&query).unwrap();
                    pages += 1;
                    if result.docs.len() < 100 {
                        break;
                    }
                    query = query.bookmark(result.bookmark);
                }
                pages
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_find_scan,
    bench_find_indexed,
    bench_find_sorted_pages
);
criterion_main!(benches);
