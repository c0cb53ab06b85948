//! Integration tests for the partitioned storage engine.

use barvault_core::domain::{Bar, JobId, Timeframe};
use barvault_core::storage::lock::JobLock;
use barvault_core::storage::{PartitionKey, PartitionedStorageEngine, StorageConfig, StorageError};
use chrono::NaiveDate;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const TS_0950: i64 = 1_705_312_200_000_000_000; // 2024-01-15T09:50:00Z
const MINUTE: i64 = 60_000_000_000;
const DAY: i64 = 86_400_000_000_000;

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn bar(symbol: &str, ts_ns: i64, close: f64) -> Bar {
    Bar {
        symbol: symbol.into(),
        ts_ns,
        open: close - 0.5,
        high: close + 1.0,
        low: close - 1.0,
        close,
        volume: 1_000,
        trade_count: Some(12),
        vwap: Some(close - 0.1),
    }
}

fn minute_bars(symbol: &str, start: i64, n: usize, close: f64) -> Vec<Bar> {
    (0..n)
        .map(|i| bar(symbol, start + i as i64 * MINUTE, close + i as f64))
        .collect()
}

fn engine(root: &Path) -> PartitionedStorageEngine {
    PartitionedStorageEngine::new(root, StorageConfig::default()).unwrap()
}

fn job(id: &str) -> JobId {
    JobId::new(id).unwrap()
}

fn no_temp_files(dir: &Path) -> bool {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(Result::ok)
        .all(|e| e.path().extension().and_then(|x| x.to_str()) != Some("tmp"))
}

// ── write / load ─────────────────────────────────────────────────────

#[test]
fn write_then_load_partition_returns_rows_sorted() {
    let dir = tempfile::tempdir().unwrap();
    let store = engine(dir.path());
    let rows = vec![
        bar("AAPL", TS_0950, 185.2),
        bar("AAPL", TS_0950 + MINUTE, 185.4),
    ];

    let path = store
        .write(&rows, Timeframe::minutes(1), "AAPL", day(2024, 1, 15), &job("job1"), false)
        .unwrap();
    assert_eq!(
        path,
        dir.path()
            .join("timeframe=1m/symbol=AAPL/date=2024-01-15/job1.parquet")
    );

    let loaded = store
        .load_partition(Timeframe::minutes(1), "AAPL", day(2024, 1, 15))
        .unwrap();
    assert_eq!(loaded, rows);
    assert_eq!(loaded[0].ts_ns, 1_705_312_200_000_000_000);
    assert_eq!(loaded[1].ts_ns, 1_705_312_260_000_000_000);
}

#[test]
fn empty_write_is_rejected_without_creating_files() {
    let dir = tempfile::tempdir().unwrap();
    let store = engine(dir.path());

    let err = store
        .write(&[], Timeframe::minutes(1), "AAPL", day(2024, 1, 15), &job("job1"), false)
        .unwrap_err();
    assert!(matches!(err, StorageError::EmptyInput));
    assert!(!dir.path().join("timeframe=1m").exists());
}

#[test]
fn missing_partition_loads_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = engine(dir.path());
    let rows = store
        .load_partition(Timeframe::minutes(1), "MSFT", day(2024, 1, 15))
        .unwrap();
    assert!(rows.is_empty());
}

#[test]
fn existing_job_file_is_not_overwritten_without_flag() {
    let dir = tempfile::tempdir().unwrap();
    let store = engine(dir.path());
    let tf = Timeframe::minutes(1);
    let path = store
        .write(&minute_bars("AAPL", TS_0950, 3, 100.0), tf, "AAPL", day(2024, 1, 15), &job("job1"), false)
        .unwrap();
    let before = fs::read(&path).unwrap();

    let err = store
        .write(&minute_bars("AAPL", TS_0950, 5, 200.0), tf, "AAPL", day(2024, 1, 15), &job("job1"), false)
        .unwrap_err();
    assert!(matches!(err, StorageError::AlreadyExists { .. }));
    assert_eq!(fs::read(&path).unwrap(), before);

    store
        .write(&minute_bars("AAPL", TS_0950, 5, 200.0), tf, "AAPL", day(2024, 1, 15), &job("job1"), true)
        .unwrap();
    let loaded = store.load_partition(tf, "AAPL", day(2024, 1, 15)).unwrap();
    assert_eq!(loaded.len(), 5);
    assert_eq!(loaded[0].close, 200.0);
}

#[test]
fn rows_from_another_day_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = engine(dir.path());
    let rows = vec![bar("AAPL", TS_0950 + DAY, 1.0)];
    let err = store
        .write(&rows, Timeframe::minutes(1), "AAPL", day(2024, 1, 15), &job("job1"), false)
        .unwrap_err();
    assert!(matches!(err, StorageError::Schema(_)));
}

#[test]
fn path_unsafe_symbol_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = engine(dir.path());
    let rows = vec![bar("../x", TS_0950, 1.0)];
    let err = store
        .write(&rows, Timeframe::minutes(1), "../x", day(2024, 1, 15), &job("job1"), false)
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidKey(_)));
}

// ── append ───────────────────────────────────────────────────────────

#[test]
fn overlapping_appends_keep_each_timestamp_once_with_later_value() {
    let dir = tempfile::tempdir().unwrap();
    let store = engine(dir.path());
    let tf = Timeframe::minutes(1);
    let d = day(2024, 1, 15);

    store
        .append_to_job(&minute_bars("AAPL", TS_0950, 4, 100.0), tf, "AAPL", d, &job("job1"))
        .unwrap();
    store
        .append_to_job(&minute_bars("AAPL", TS_0950 + 2 * MINUTE, 4, 500.0), tf, "AAPL", d, &job("job1"))
        .unwrap();

    let loaded = store.load_job_file(tf, "AAPL", d, &job("job1")).unwrap();
    let ts: Vec<i64> = loaded.iter().map(|b| b.ts_ns).collect();
    let expected: Vec<i64> = (0..6).map(|i| TS_0950 + i * MINUTE).collect();
    assert_eq!(ts, expected);
    assert_eq!(loaded[1].close, 101.0);
    assert_eq!(loaded[2].close, 500.0);
    assert_eq!(loaded[5].close, 503.0);
}

// ── multi-partition ──────────────────────────────────────────────────

#[test]
fn store_bars_splits_batch_by_day() {
    let dir = tempfile::tempdir().unwrap();
    let store = engine(dir.path());
    let tf = Timeframe::minutes(1);
    let mut rows = minute_bars("AAPL", TS_0950, 2, 100.0);
    rows.extend(minute_bars("AAPL", TS_0950 + DAY, 3, 110.0));

    let records = store.store_bars(&rows, tf, &job("job1"), true).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].day, day(2024, 1, 15));
    assert_eq!(records[0].rows, 2);
    assert_eq!(records[1].day, day(2024, 1, 16));
    assert_eq!(records[1].rows, 3);

    assert!(store.store_bars(&[], tf, &job("job1"), true).unwrap().is_empty());

    let all = store.load_symbol_data("AAPL", tf, None, None).unwrap();
    assert_eq!(all, rows);
    let second_day = store
        .load_symbol_data("AAPL", tf, Some(day(2024, 1, 16)), None)
        .unwrap();
    assert_eq!(second_day.len(), 3);
    let first_day = store
        .load_symbol_data("AAPL", tf, None, Some(day(2024, 1, 15)))
        .unwrap();
    assert_eq!(first_day.len(), 2);
}

#[test]
fn load_job_bars_groups_by_symbol() {
    let dir = tempfile::tempdir().unwrap();
    let store = engine(dir.path());
    let tf = Timeframe::minutes(1);
    store.store_bars(&minute_bars("AAPL", TS_0950, 2, 1.0), tf, &job("job1"), false).unwrap();
    store.store_bars(&minute_bars("MSFT", TS_0950, 3, 1.0), tf, &job("job1"), false).unwrap();
    store.store_bars(&minute_bars("MSFT", TS_0950, 1, 9.0), tf, &job("other"), false).unwrap();

    let by_symbol = store.load_job_bars(&job("job1")).unwrap();
    assert_eq!(by_symbol.len(), 2);
    assert_eq!(by_symbol["AAPL"].len(), 2);
    assert_eq!(by_symbol["MSFT"].len(), 3);
    assert!(by_symbol["MSFT"].iter().all(|b| b.close < 9.0));
}

#[test]
fn partition_prefers_most_recently_written_job() {
    let dir = tempfile::tempdir().unwrap();
    let store = engine(dir.path());
    let tf = Timeframe::minutes(1);
    let d = day(2024, 1, 15);
    store.write(&[bar("AAPL", TS_0950, 1.0)], tf, "AAPL", d, &job("zzz-old"), false).unwrap();
    thread::sleep(Duration::from_millis(20));
    store.write(&[bar("AAPL", TS_0950, 2.0)], tf, "AAPL", d, &job("aaa-new"), false).unwrap();

    let loaded = store.load_partition(tf, "AAPL", d).unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].close, 2.0);
}

// ── delete / list / stats ────────────────────────────────────────────

#[test]
fn delete_job_removes_it_everywhere() {
    let dir = tempfile::tempdir().unwrap();
    let store = engine(dir.path());
    let tf = Timeframe::minutes(1);
    let mut rows = minute_bars("AAPL", TS_0950, 2, 100.0);
    rows.extend(minute_bars("AAPL", TS_0950 + DAY, 2, 100.0));
    store.store_bars(&rows, tf, &job("job1"), false).unwrap();
    store.store_bars(&rows, tf, &job("job2"), false).unwrap();
    assert_eq!(store.list_jobs(tf, "AAPL").unwrap(), vec![job("job1"), job("job2")]);

    assert_eq!(store.delete_job(&job("job1")).unwrap(), 2);
    assert!(store.load_job_bars(&job("job1")).unwrap().is_empty());
    assert_eq!(store.list_jobs(tf, "AAPL").unwrap(), vec![job("job2")]);
    assert_eq!(store.delete_job(&job("job1")).unwrap(), 0);
}

#[test]
fn stats_describe_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = engine(dir.path());
    let mut rows = minute_bars("AAPL", TS_0950, 2, 100.0);
    rows.extend(minute_bars("AAPL", TS_0950 + DAY, 2, 100.0));
    store.store_bars(&rows, Timeframe::minutes(1), &job("job1"), false).unwrap();
    store
        .store_bars(&minute_bars("MSFT", TS_0950, 1, 1.0), Timeframe::daily(), &job("job2"), false)
        .unwrap();

    let stats = store.storage_stats().unwrap();
    assert_eq!(stats.file_count, 3);
    assert_eq!(stats.partition_count, 3);
    assert!(stats.total_bytes > 0);
    assert_eq!(stats.timeframes, vec!["1d".to_string(), "1m".to_string()]);
    assert_eq!(stats.symbols, vec!["AAPL".to_string(), "MSFT".to_string()]);
    assert_eq!(stats.job_ids, vec!["job1".to_string(), "job2".to_string()]);
    assert_eq!(stats.earliest_day, Some(day(2024, 1, 15)));
    assert_eq!(stats.latest_day, Some(day(2024, 1, 16)));
}

// ── corruption ───────────────────────────────────────────────────────

#[test]
fn corrupt_file_is_skipped_on_read_and_reported_by_integrity() {
    let dir = tempfile::tempdir().unwrap();
    let store = engine(dir.path());
    let tf = Timeframe::minutes(1);
    let d = day(2024, 1, 15);
    let rows = minute_bars("AAPL", TS_0950, 3, 100.0);
    let good = store.write(&rows, tf, "AAPL", d, &job("good"), false).unwrap();
    let bad = good.with_file_name("bad.parquet");
    fs::write(&bad, b"definitely not parquet").unwrap();

    assert_eq!(store.load_partition(tf, "AAPL", d).unwrap(), rows);
    assert_eq!(store.load_job_bars(&job("bad")).unwrap().len(), 0);

    let report = store.validate_integrity().unwrap();
    assert_eq!(report.valid_files, 1);
    assert_eq!(report.total_rows, 3);
    assert_eq!(report.corrupted_files.len(), 1);
    assert_eq!(report.corrupted_files[0].path, bad);
    assert!(!report.is_healthy);
}

#[test]
fn healthy_store_reports_healthy() {
    let dir = tempfile::tempdir().unwrap();
    let store = engine(dir.path());
    let report = store.validate_integrity().unwrap();
    assert!(report.is_healthy);
    assert_eq!(report.valid_files, 0);
}

// ── locking ──────────────────────────────────────────────────────────

#[test]
fn held_lock_times_out_writer() {
    let dir = tempfile::tempdir().unwrap();
    let config = StorageConfig::default().with_lock_timeout(Duration::from_millis(100));
    let store = PartitionedStorageEngine::new(dir.path(), config).unwrap();
    let tf = Timeframe::minutes(1);
    let d = day(2024, 1, 15);
    let key = PartitionKey {
        timeframe: tf,
        symbol: "AAPL".into(),
        day: d,
    };
    let target = store.job_file_path(&key, &job("job1"));
    fs::create_dir_all(target.parent().unwrap()).unwrap();

    let held = JobLock::acquire(&target, Duration::from_secs(1)).unwrap();
    let err = store
        .write(&minute_bars("AAPL", TS_0950, 1, 1.0), tf, "AAPL", d, &job("job1"), true)
        .unwrap_err();
    assert!(matches!(err, StorageError::LockTimeout { .. }));
    assert!(!target.exists());

    drop(held);
    store
        .write(&minute_bars("AAPL", TS_0950, 1, 1.0), tf, "AAPL", d, &job("job1"), true)
        .unwrap();
}

// Each writer opens its own lock file handle, and flock exclusion is per open
// file description, so two threads contend exactly as two processes would.
#[test]
fn concurrent_overwrites_leave_one_complete_file() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    let tf = Timeframe::minutes(1);
    let d = day(2024, 1, 15);
    let version_a = Arc::new(minute_bars("AAPL", TS_0950, 50, 100.0));
    let version_b = Arc::new(minute_bars("AAPL", TS_0950, 80, 900.0));

    let writers: Vec<_> = [Arc::clone(&version_a), Arc::clone(&version_b)]
        .into_iter()
        .map(|rows| {
            let root = root.clone();
            thread::spawn(move || {
                let store = engine(&root);
                for _ in 0..5 {
                    store.write(&rows, tf, "AAPL", d, &job("job1"), true).unwrap();
                }
            })
        })
        .collect();

    let reader = {
        let root = root.clone();
        let (a, b) = (Arc::clone(&version_a), Arc::clone(&version_b));
        thread::spawn(move || {
            let store = engine(&root);
            for _ in 0..20 {
                match store.load_job_file(tf, "AAPL", d, &job("job1")) {
                    Ok(rows) => assert!(rows == *a || rows == *b, "observed a torn write"),
                    Err(StorageError::NotFound { .. }) => {}
                    Err(e) => panic!("unexpected read error: {e}"),
                }
            }
        })
    };

    for w in writers {
        w.join().unwrap();
    }
    reader.join().unwrap();

    let store = engine(&root);
    let final_rows = store.load_job_file(tf, "AAPL", d, &job("job1")).unwrap();
    assert!(final_rows == *version_a || final_rows == *version_b);

    let partition = root.join("timeframe=1m/symbol=AAPL/date=2024-01-15");
    assert!(no_temp_files(&partition));
}

#[test]
fn failed_rename_removes_the_temp_file() {
    let dir = tempfile::tempdir().unwrap();
    let store = engine(dir.path());
    let tf = Timeframe::minutes(1);
    let d = day(2024, 1, 15);
    let key = PartitionKey {
        timeframe: tf,
        symbol: "AAPL".into(),
        day: d,
    };
    let target = store.job_file_path(&key, &job("job1"));
    // A non-empty directory squatting on the job file path makes the final rename fail.
    fs::create_dir_all(target.join("occupied")).unwrap();

    let result = store.write(&minute_bars("AAPL", TS_0950, 3, 100.0), tf, "AAPL", d, &job("job1"), true);

    assert!(result.is_err());
    assert!(target.is_dir());
    assert!(no_temp_files(target.parent().unwrap()));
}
