//! Comparator and sort benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use recliner_bench::random_docs;
use recliner_codec::{compare, value, SortComparator, SortDirection};

/// Benchmark pairwise comparison across value kinds.
fn bench_compare(c: &mut Criterion) {
    let mut group = c.benchmark_group("compare");
    let pairs = [
        ("numbers", value!(41.5), value!(42)),
        ("strings", value!("apple"), value!("Apple")),
        ("mixed", value!("1"), value!(1)),
        ("arrays", value!([1, "a", [true, null]]), value!([1, "a", [true, false]])),
        (
            "objects",
            value!({"a": 1, "b": {"c": "x"}}),
            value!({"a": 1, "b": {"c": "y"}}),
        ),
    ];
    for (name, a, b) in &pairs {
        group.bench_function(*name, |bench| {
            bench.iter(|| compare(black_box(a), black_box(b)));
        });
    }
    group.finish();
}

/// Benchmark multi-field document sorts.
fn bench_sort(c: &mut Criterion) {
    let mut group = c.benchmark_group("sort");
    let comparator = SortComparator::new()
        .field("address.city", SortDirection::Asc)
        .field("age", SortDirection::Desc);

    for count in [100, 1000, 10_000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let docs = random_docs(count);
            b.iter(|| {
                let mut docs = docs.clone();
                comparator.sort(black_box(&mut docs));
                docs
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_compare, bench_sort);
criterion_main!(benches);
