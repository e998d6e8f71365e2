//! Benchmarks for the per-cycle cleaning path and spool persistence

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use enviro_relay::stabilizer::median;
use enviro_relay::{Batch, BatchBuilder, Bounds, Compensator, Metric, Reading, Sanitizer, Spool};
use std::time::Duration;

fn readings(i: usize) -> Vec<Reading> {
    Metric::ALL
        .iter()
        .map(|&m| Reading::new(m, Some(20.0 + (i as f64 % 10.0) * 0.1)))
        .collect()
}

fn sample_batch() -> Batch {
    BatchBuilder::new("bench")
        .build(Utc::now(), &readings(0))
        .unwrap()
}

fn bench_cleaning(c: &mut Criterion) {
    let mut group = c.benchmark_group("cleaning");
    group.throughput(Throughput::Elements(1000));

    group.bench_function("median_of_5_x1000", |b| {
        b.iter(|| {
            for i in 0..1000 {
                let mut samples = [21.3, 21.1, 85.0 + i as f64, 21.2, 21.4];
                black_box(median(&mut samples));
            }
        })
    });

    group.bench_function("compensate_x1000", |b| {
        b.iter(|| {
            let mut compensator = Compensator::new();
            for i in 0..1000 {
                black_box(compensator.compensate(21.0, 40.0 + (i % 7) as f64));
            }
        })
    });

    group.bench_function("sanitize_x1000", |b| {
        let bounds = Bounds::default_for(Metric::Temperature);
        b.iter(|| {
            let mut sanitizer = Sanitizer::new();
            for i in 0..1000 {
                let v = 20.0 + (i as f64 % 10.0) * 0.1;
                black_box(sanitizer.sanitize("temperature", Some(v), &bounds));
            }
        })
    });

    group.finish();
}

fn bench_batches(c: &mut Criterion) {
    let mut group = c.benchmark_group("batches");

    let builder = BatchBuilder::new("bench");
    let inputs: Vec<Vec<Reading>> = (0..100).map(readings).collect();
    group.throughput(Throughput::Elements(100));

    group.bench_function("build_100_batches", |b| {
        b.iter(|| {
            for r in &inputs {
                black_box(builder.build(Utc::now(), r));
            }
        })
    });

    group.finish();
}

fn bench_spool(c: &mut Criterion) {
    let mut group = c.benchmark_group("spool");
    group.sample_size(20);

    let dir = tempfile::tempdir().unwrap();
    let batch = sample_batch();

    group.bench_function("persist_into_100_entries", |b| {
        let mut spool = Spool::new(dir.path().join("bench.json"), 100).with_drain_pause(Duration::ZERO);
        for _ in 0..100 {
            spool.persist(&batch);
        }
        b.iter(|| spool.persist(black_box(&batch)))
    });

    group.finish();
}

criterion_group!(benches, bench_cleaning, bench_batches, bench_spool);

criterion_main!(benches);
