//! Bind relation benchmark suite
//!
//! Benchmarks for bind/unbind churn and topological ordering.
//!
//! Run with: `cargo bench -p bqs-routing`

use std::sync::Arc;

use bqs_routing::{BindRelation, EntityInfo, LocalQueueService};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

/// Build a relation holding `count` chains of length 3
fn build_chains(count: u32) -> BindRelation {
    let mut relation = BindRelation::new(Arc::new(LocalQueueService::new()));
    for i in 0..count {
        let base = i * 3;
        relation
            .bind(&EntityInfo::queue(base, 0), &EntityInfo::queue(base + 1, 0), 0)
            .unwrap();
        relation
            .bind(&EntityInfo::queue(base + 1, 0), &EntityInfo::queue(base + 2, 0), 0)
            .unwrap();
    }
    relation
}

/// Benchmark binding then unbinding one edge on a populated graph
fn bench_bind_unbind(c: &mut Criterion) {
    let mut group = c.benchmark_group("bind_unbind");

    for size in [100u32, 1000, 10_000] {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let mut relation = build_chains(size);
            let src = EntityInfo::queue(u32::MAX - 1, 0);
            let dst = EntityInfo::queue(u32::MAX - 2, 0);
            b.iter(|| {
                relation.bind(&src, &dst, 0).unwrap();
                relation.unbind(&src, &dst, 0).unwrap();
                black_box(relation.count_binds(0))
            });
        });
    }

    group.finish();
}

/// Benchmark recomputing the topological order
fn bench_order(c: &mut Criterion) {
    let mut group = c.benchmark_group("order");

    for size in [100u32, 1000, 10_000] {
        group.throughput(Throughput::Elements(u64::from(size) * 2));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let mut relation = build_chains(size);
            b.iter(|| {
                relation.order(0);
                black_box(relation.has_loop(0))
            });
        });
    }

    group.finish();
}

/// Benchmark listing every edge in key order
fn bench_edges(c: &mut Criterion) {
    let relation = build_chains(10_000);
    c.bench_function("edges_10000", |b| {
        b.iter(|| black_box(relation.edges(0).len()));
    });
}

criterion_group!(benches, bench_bind_unbind, bench_order, bench_edges);
criterion_main!(benches);
