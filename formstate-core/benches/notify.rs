//! Benchmarks for the set/notify path.

use std::cell::Cell as Counter;
use std::rc::Rc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use formstate_core::reactive::{Aggregate, AggregateOptions, Cell, Runtime};

fn fields(runtime: &Runtime, size: usize) -> Vec<(String, Cell<i64>)> {
    (0..size)
        .map(|i| (format!("field{i}"), runtime.cell(0)))
        .collect()
}

fn bench_cell_set(c: &mut Criterion) {
    let mut group = c.benchmark_group("cell");

    for subscribers in [1, 10, 100] {
        let runtime = Runtime::new();
        let cell = runtime.cell(0i64);
        let hits = Rc::new(Counter::new(0u64));
        let _subs: Vec<_> = (0..subscribers)
            .map(|_| {
                let hits = hits.clone();
                cell.subscribe_with(move |_, _| hits.set(hits.get() + 1), || {}, false)
            })
            .collect();

        group.bench_with_input(
            BenchmarkId::new("set", subscribers),
            &cell,
            |b, cell| {
                let mut n = 0i64;
                b.iter(|| {
                    n += 1;
                    cell.set(black_box(n));
                })
            },
        );
    }

    group.finish();
}

fn bench_aggregate(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregate");

    for size in [4, 32, 256] {
        let runtime = Runtime::new();
        let cells = fields(&runtime, size);
        let aggregate = Aggregate::with_options(cells.clone(), AggregateOptions::all());
        let _sub = aggregate.subscribe_with(
            |fields, _| {
                black_box(fields.get("field0"));
            },
            || {},
            false,
        );

        group.bench_with_input(BenchmarkId::new("set_tracked", size), &cells, |b, cells| {
            let mut n = 0i64;
            b.iter(|| {
                n += 1;
                cells[0].1.set(black_box(n));
            })
        });

        group.bench_with_input(BenchmarkId::new("transaction_all", size), &cells, |b, cells| {
            let mut n = 0i64;
            b.iter(|| {
                n += 1;
                aggregate.transaction(|| {
                    for (_, cell) in cells {
                        cell.set(n);
                    }
                });
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_cell_set, bench_aggregate);
criterion_main!(benches);
