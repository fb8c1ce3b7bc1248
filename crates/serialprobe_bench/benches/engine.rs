//! In-memory engine benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serialprobe_bench::{seeded_node, BENCH_ROW};
use serialprobe_store::{IsolationLevel, NodeStore, RowId, Statement};

/// Benchmark an autocommit read at each isolation level.
fn bench_select(c: &mut Criterion) {
    let mut group = c.benchmark_group("select");
    let node = seeded_node();
    let statement = Statement::select(RowId::new(BENCH_ROW));

    for level in IsolationLevel::ALL {
        group.bench_with_input(BenchmarkId::from_parameter(level.as_sql()), &level, |b, &level| {
            b.iter(|| {
                let outcome = node.execute(black_box(&statement), level).unwrap();
                black_box(outcome.first_amount());
            });
        });
    }

    group.finish();
}

/// Benchmark the read-update-commit cycle a Worker performs.
fn bench_update_transaction(c: &mut Criterion) {
    let mut group = c.benchmark_group("update_transaction");
    let node = seeded_node();
    let row = RowId::new(BENCH_ROW);

    for level in IsolationLevel::ALL {
        group.bench_with_input(BenchmarkId::from_parameter(level.as_sql()), &level, |b, &level| {
            let mut amount = 1000.0;
            b.iter(|| {
                let mut txn = node.begin(level).unwrap();
                let before = txn.execute(&Statement::select_for_update(row)).unwrap();
                amount += 1.0;
                txn.execute(&Statement::update(row, black_box(amount))).unwrap();
                txn.commit().unwrap();
                black_box(before.first_amount());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_select, bench_update_transaction);

criterion_main!(benches);
