//! Criterion benchmarks for the bar store hot paths.
//!
//! Benchmarks:
//! 1. Job file write (overwrite) at several batch sizes
//! 2. Partition load across several job files
//! 3. Append with overlapping timestamps (read-merge-rewrite)

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use barvault_core::domain::{Bar, JobId, Timeframe};
use barvault_core::storage::{merge_rows, PartitionedStorageEngine, StorageConfig};
use chrono::NaiveDate;

// ── Helpers ──────────────────────────────────────────────────────────

const DAY_START: i64 = 1_705_276_800_000_000_000; // 2024-01-15T00:00:00Z
const SECOND: i64 = 1_000_000_000;

fn make_bars(n: usize, offset_s: i64) -> Vec<Bar> {
    (0..n)
        .map(|i| {
            let close = 100.0 + (i as f64 * 0.1).sin() * 10.0;
            Bar {
                symbol: "SPY".into(),
                ts_ns: DAY_START + (offset_s + i as i64) * SECOND,
                open: close - 0.3,
                high: close + 1.5,
                low: close - 1.5,
                close,
                volume: 1_000_000 + (i as u64 % 500_000),
                trade_count: Some(100 + i as u64 % 50),
                vwap: Some(close - 0.05),
            }
        })
        .collect()
}

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
}

// ── 1. Write ─────────────────────────────────────────────────────────

fn bench_write(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let store = PartitionedStorageEngine::new(dir.path(), StorageConfig::default()).unwrap();
    let job = JobId::new("bench").unwrap();
    let tf = Timeframe::minutes(1);

    let mut group = c.benchmark_group("write");
    for n in [1_000usize, 10_000, 50_000] {
        let rows = make_bars(n, 0);
        group.bench_with_input(BenchmarkId::from_parameter(n), &rows, |b, rows| {
            b.iter(|| {
                store
                    .write(black_box(rows), tf, "SPY", day(), &job, true)
                    .unwrap()
            })
        });
    }
    group.finish();
}

// ── 2. Load ──────────────────────────────────────────────────────────

fn bench_load_partition(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let store = PartitionedStorageEngine::new(dir.path(), StorageConfig::default()).unwrap();
    let tf = Timeframe::minutes(1);
    for j in 0..4 {
        let job = JobId::new(format!("job{j}")).unwrap();
        store
            .write(&make_bars(10_000, j * 5_000), tf, "SPY", day(), &job, true)
            .unwrap();
    }

    c.bench_function("load_partition_4x10k", |b| {
        b.iter(|| black_box(store.load_partition(tf, "SPY", day()).unwrap()))
    });
}

// ── 3. Append / merge ────────────────────────────────────────────────

fn bench_append(c: &mut Criterion) {
    let existing = make_bars(20_000, 0);
    let incoming = make_bars(20_000, 10_000);
    c.bench_function("merge_rows_20k_overlap_10k", |b| {
        b.iter(|| black_box(merge_rows(existing.clone(), incoming.clone())))
    });

    let dir = tempfile::tempdir().unwrap();
    let store = PartitionedStorageEngine::new(dir.path(), StorageConfig::default()).unwrap();
    let job = JobId::new("append").unwrap();
    let tf = Timeframe::minutes(1);
    let seed = make_bars(10_000, 0);
    let batch = make_bars(1_000, 9_500);
    c.bench_function("append_1k_to_10k", |b| {
        b.iter(|| {
            store.write(&seed, tf, "SPY", day(), &job, true).unwrap();
            store.append_to_job(black_box(&batch), tf, "SPY", day(), &job).unwrap()
        })
    });
}

criterion_group!(benches, bench_write, bench_load_partition, bench_append);
criterion_main!(benches);
