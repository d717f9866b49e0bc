//! Benchmarks for incremental decorator dispatch.
//!
//! Run with: `cargo bench --package vista-pipeline --bench pipeline_bench`
//!
//! # Performance Baselines
//!
//! - Single inserts through a Filter + Sort chain versus a full reset
//! - Item-changed bursts below and above the reset threshold
//! - Decorated reads over lazy and cached chains

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use std::time::Duration;
use vista_pipeline::decorators::{Filter, Limit, Materialize, Sort};
use vista_pipeline::{ChangeArgs, ObservableCollection, PipelineConfig};

// ============================================================================
// Data
// ============================================================================

/// Deterministic pseudo-random values (xorshift).
fn values(n: usize, seed: u64) -> Vec<u64> {
    let mut x = seed.max(1);
    (0..n)
        .map(|_| {
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            x % 10_000
        })
        .collect()
}

fn filtered_sorted(n: usize) -> ObservableCollection<u64> {
    let c = ObservableCollection::from_vec(values(n, 7));
    c.attach(Filter::new(|x: &u64| x % 3 != 0)).expect("attach filter");
    c.attach(Sort::ascending()).expect("attach sort");
    c.decorated_len().expect("initialize");
    c
}

// ============================================================================
// Incremental vs reset
// ============================================================================

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline/insert");
    for n in [1_000usize, 10_000] {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("incremental", n), &n, |b, &n| {
            let coll = filtered_sorted(n);
            let mut next = 0u64;
            b.iter(|| {
                next = next.wrapping_add(7_919) % 10_000;
                coll.insert(black_box(n / 2), next).expect("insert");
                coll.remove_at(n / 2).expect("remove");
            });
        });
        group.bench_with_input(BenchmarkId::new("reset", n), &n, |b, &n| {
            let coll = filtered_sorted(n);
            let items = values(n, 11);
            b.iter(|| coll.reset(black_box(items.clone())).expect("reset"));
        });
    }
    group.finish();
}

// ============================================================================
// Item-changed bursts
// ============================================================================

fn bench_item_changed(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline/item_changed");
    for burst in [10usize, 200] {
        group.throughput(Throughput::Elements(burst as u64));
        group.bench_with_input(BenchmarkId::from_parameter(burst), &burst, |b, &burst| {
            let config = PipelineConfig::default().with_item_changed_delay(Duration::from_secs(1));
            let coll = ObservableCollection::from_vec_with_config(values(5_000, 3), config);
            coll.attach(Sort::ascending()).expect("attach sort");
            coll.decorated_len().expect("initialize");
            let targets: Vec<u64> = coll.items().into_iter().take(burst).collect();
            b.iter(|| {
                for item in &targets {
                    coll.raise_item_changed(*item, ChangeArgs::default())
                        .expect("raise");
                }
                coll.flush_item_changes().expect("flush");
            });
        });
    }
    group.finish();
}

// ============================================================================
// Reads
// ============================================================================

fn bench_reads(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline/read");
    let n = 10_000usize;
    group.throughput(Throughput::Elements(n as u64));

    let lazy = ObservableCollection::from_vec(values(n, 5));
    lazy.attach(Filter::new(|x: &u64| x % 2 == 0)).expect("attach");
    group.bench_function("lazy_filter", |b| {
        b.iter(|| black_box(lazy.decorated_items().expect("read")))
    });

    let cached = ObservableCollection::from_vec(values(n, 5));
    cached.attach(Filter::new(|x: &u64| x % 2 == 0)).expect("attach");
    cached.attach(Materialize::new()).expect("attach");
    cached.attach(Limit::new(100)).expect("attach");
    group.bench_function("materialized_limit", |b| {
        b.iter(|| black_box(cached.decorated_items().expect("read")))
    });
    group.finish();
}

// ============================================================================
// Criterion Configuration
// ============================================================================

criterion_group!(benches, bench_insert, bench_item_changed, bench_reads);

criterion_main!(benches);
