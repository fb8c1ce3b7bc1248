//! Distributed lock manager benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serialprobe_bench::{node_set, BENCH_ROW};
use serialprobe_core::{FileLockTable, LockManager, LockOptions, Resource};
use serialprobe_store::NodeId;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Benchmark a single acquire/release pair.
fn bench_acquire_release(c: &mut Criterion) {
    let mut group = c.benchmark_group("acquire_release");
    let resource = Resource::trans(BENCH_ROW);

    group.bench_function("memory", |b| {
        let manager = LockManager::in_memory("bench", LockOptions::new());
        b.iter(|| {
            let acquired = manager
                .acquire(black_box(&resource), NodeId::new(1), Duration::ZERO)
                .unwrap();
            manager.release(&resource, NodeId::new(1)).unwrap();
            black_box(acquired);
        });
    });

    group.bench_function("file", |b| {
        let temp_dir = TempDir::new().unwrap();
        let table = FileLockTable::open(temp_dir.path().join("locks.json")).unwrap();
        let manager = LockManager::new(Arc::new(table), "bench", LockOptions::new());
        b.iter(|| {
            let acquired = manager
                .acquire(black_box(&resource), NodeId::new(1), Duration::ZERO)
                .unwrap();
            manager.release(&resource, NodeId::new(1)).unwrap();
            black_box(acquired);
        });
    });

    group.finish();
}

/// Benchmark multi-node acquisition by node count.
fn bench_acquire_all(c: &mut Criterion) {
    let mut group = c.benchmark_group("acquire_all");
    let resource = Resource::trans(BENCH_ROW);

    for count in [1u32, 3, 8, 32] {
        let set = node_set(count);
        group.throughput(Throughput::Elements(u64::from(count)));
        group.bench_with_input(BenchmarkId::new("memory", count), &set, |b, set| {
            let manager = LockManager::in_memory("bench", LockOptions::new());
            b.iter(|| {
                let acquired = manager
                    .acquire_all(black_box(&resource), black_box(set), Duration::ZERO)
                    .unwrap();
                manager.release_all(&resource, set).unwrap();
                black_box(acquired);
            });
        });
    }

    group.finish();
}

/// Benchmark acquisition that loses at the last node and rolls back.
fn bench_partial_rollback(c: &mut Criterion) {
    let mut group = c.benchmark_group("partial_rollback");
    let resource = Resource::trans(BENCH_ROW);

    for count in [3u32, 8] {
        let set = node_set(count);
        group.bench_with_input(BenchmarkId::new("memory", count), &set, |b, set| {
            let manager = LockManager::in_memory("bench", LockOptions::new());
            let rival = manager.with_owner("rival");
            rival.acquire(&resource, NodeId::new(count), Duration::ZERO).unwrap();
            b.iter(|| {
                let acquired = manager
                    .acquire_all(black_box(&resource), black_box(set), Duration::ZERO)
                    .unwrap();
                black_box(acquired);
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_acquire_release,
    bench_acquire_all,
    bench_partial_rollback,
);

criterion_main!(benches);
