//! The partitioned storage engine.

use chrono::NaiveDate;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

use super::frame::{bars_to_dataframe, count_rows, read_job_file, sync_dir, write_parquet};
use super::layout::{
    day_dirs, job_file_path, job_files_in, partition_dir, symbol_dir, validate_symbol, walk,
    PartitionKey, TEMP_FILE_EXT,
};
use super::lock::JobLock;
use super::report::{CorruptFile, IntegrityReport, PartitionRecord, StorageStats};
use super::{StorageConfig, StorageError};
use crate::domain::{sort_dedup_keep_last, Bar, JobId, Timeframe};
use crate::schema::{validate_batch, validate_partition_rows, BarSchema};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Combine a job file's rows with new rows: ascending by timestamp, and for a
/// repeated timestamp the incoming row replaces the existing one.
pub fn merge_rows(mut existing: Vec<Bar>, incoming: Vec<Bar>) -> Vec<Bar> {
    existing.extend(incoming);
    sort_dedup_keep_last(existing)
}

/// Owns the on-disk layout under one storage root.
///
/// Every method is synchronous; async callers run writes on a blocking pool.
#[derive(Debug, Clone)]
pub struct PartitionedStorageEngine {
    root: PathBuf,
    config: StorageConfig,
}

impl PartitionedStorageEngine {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>, config: StorageConfig) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| StorageError::io(&root, source))?;
        if !root.is_dir() {
            return Err(StorageError::InvalidKey(format!(
                "storage root {} is not a directory",
                root.display()
            )));
        }
        Ok(Self { root, config })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn job_file_path(&self, key: &PartitionKey, job_id: &JobId) -> PathBuf {
        job_file_path(&self.root, key, job_id)
    }

    // ── Writes ──────────────────────────────────────────────────────

    /// Write one job file for `(timeframe, symbol, day, job_id)`.
    ///
    /// Without `overwrite` an existing job file is left untouched and
    /// `AlreadyExists` is returned.
    pub fn write(
        &self,
        rows: &[Bar],
        timeframe: Timeframe,
        symbol: &str,
        day: NaiveDate,
        job_id: &JobId,
        overwrite: bool,
    ) -> Result<PathBuf, StorageError> {
        let key = checked_key(rows, timeframe, symbol, day)?;
        let path = self.prepare_partition(&key, job_id)?;

        let _lock = JobLock::acquire(&path, self.config.lock_timeout())?;
        if !overwrite && path.exists() {
            return Err(StorageError::AlreadyExists { path });
        }
        self.write_file(rows, &path)?;

        info!(
            timeframe = %timeframe,
            symbol,
            day = %day,
            job_id = %job_id,
            rows = rows.len(),
            "wrote job file"
        );
        Ok(path)
    }

    /// Merge `rows` into an existing job file, or create it.
    ///
    /// The job lock is held across read, merge and rewrite.
    pub fn append_to_job(
        &self,
        rows: &[Bar],
        timeframe: Timeframe,
        symbol: &str,
        day: NaiveDate,
        job_id: &JobId,
    ) -> Result<PathBuf, StorageError> {
        let key = checked_key(rows, timeframe, symbol, day)?;
        let path = self.prepare_partition(&key, job_id)?;

        let _lock = JobLock::acquire(&path, self.config.lock_timeout())?;
        let existing = if path.exists() {
            read_job_file(&path)?
        } else {
            Vec::new()
        };
        let existing_rows = existing.len();
        let merged = merge_rows(existing, rows.to_vec());
        self.write_file(&merged, &path)?;

        info!(
            timeframe = %timeframe,
            symbol,
            day = %day,
            job_id = %job_id,
            existing = existing_rows,
            appended = rows.len(),
            total = merged.len(),
            "appended to job file"
        );
        Ok(path)
    }

    /// Write a multi-day batch, one job file per `(symbol, trading_day)`.
    ///
    /// An empty batch writes nothing and returns no records.
    pub fn store_bars(
        &self,
        bars: &[Bar],
        timeframe: Timeframe,
        job_id: &JobId,
        overwrite: bool,
    ) -> Result<Vec<PartitionRecord>, StorageError> {
        let mut groups: BTreeMap<PartitionKey, Vec<Bar>> = BTreeMap::new();
        for bar in bars {
            let key = PartitionKey {
                timeframe,
                symbol: bar.symbol.clone(),
                day: bar.trading_day(),
            };
            groups.entry(key).or_default().push(bar.clone());
        }

        let mut records = Vec::with_capacity(groups.len());
        for (key, rows) in groups {
            let path = self.write(&rows, timeframe, &key.symbol, key.day, job_id, overwrite)?;
            records.push(PartitionRecord::new(key, job_id.clone(), path, rows.len()));
        }
        Ok(records)
    }

    fn prepare_partition(&self, key: &PartitionKey, job_id: &JobId) -> Result<PathBuf, StorageError> {
        let dir = partition_dir(&self.root, key);
        fs::create_dir_all(&dir).map_err(|source| StorageError::io(&dir, source))?;
        Ok(job_file_path(&self.root, key, job_id))
    }

    /// Temp file in the target's directory, fsync, rename. Caller holds the lock.
    fn write_file(&self, rows: &[Bar], path: &Path) -> Result<(), StorageError> {
        validate_batch(rows)?;
        let mut df = bars_to_dataframe(rows).map_err(|source| StorageError::parquet(path, source))?;
        BarSchema::validate(&df)?;

        let tmp = temp_path(path);
        let result = write_parquet(&mut df, &tmp, &self.config)
            .and_then(|()| fs::rename(&tmp, path).map_err(|source| StorageError::io(path, source)));
        if let Err(e) = result {
            match fs::remove_file(&tmp) {
                Ok(()) => debug!(tmp = %tmp.display(), "removed partial write"),
                Err(rm) if rm.kind() == std::io::ErrorKind::NotFound => {}
                Err(rm) => warn!(tmp = %tmp.display(), error = %rm, "failed to remove partial write"),
            }
            return Err(e);
        }

        if let Some(dir) = path.parent() {
            sync_dir(dir);
        }
        Ok(())
    }

    // ── Reads ───────────────────────────────────────────────────────

    /// All rows of one partition, ascending by timestamp.
    ///
    /// Job files are applied oldest-modified first, so on a repeated
    /// timestamp the most recently written file wins. Unreadable files are
    /// skipped with a warning.
    pub fn load_partition(
        &self,
        timeframe: Timeframe,
        symbol: &str,
        day: NaiveDate,
    ) -> Result<Vec<Bar>, StorageError> {
        validate_symbol(symbol)?;
        let key = PartitionKey {
            timeframe,
            symbol: symbol.to_string(),
            day,
        };
        let dir = partition_dir(&self.root, &key);

        let mut files: Vec<(SystemTime, PathBuf)> = job_files_in(&dir)?
            .into_iter()
            .map(|(_, path)| {
                let modified = fs::metadata(&path)
                    .and_then(|m| m.modified())
                    .unwrap_or(UNIX_EPOCH);
                (modified, path)
            })
            .collect();
        files.sort();

        let mut rows = Vec::new();
        for (_, path) in files {
            match read_job_file(&path) {
                Ok(bars) => rows.extend(bars),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable job file"),
            }
        }
        Ok(sort_dedup_keep_last(rows))
    }

    /// Rows of exactly one job file; `NotFound` if it does not exist.
    pub fn load_job_file(
        &self,
        timeframe: Timeframe,
        symbol: &str,
        day: NaiveDate,
        job_id: &JobId,
    ) -> Result<Vec<Bar>, StorageError> {
        validate_symbol(symbol)?;
        let key = PartitionKey {
            timeframe,
            symbol: symbol.to_string(),
            day,
        };
        read_job_file(&self.job_file_path(&key, job_id))
    }

    /// Every row written under `job_id`, grouped by symbol.
    pub fn load_job_bars(&self, job_id: &JobId) -> Result<BTreeMap<String, Vec<Bar>>, StorageError> {
        let mut by_symbol: BTreeMap<String, Vec<Bar>> = BTreeMap::new();
        for file in walk(&self.root)?.into_iter().filter(|f| &f.job_id == job_id) {
            match read_job_file(&file.path) {
                Ok(bars) => by_symbol.entry(file.key.symbol).or_default().extend(bars),
                Err(e) => {
                    warn!(path = %file.path.display(), error = %e, "skipping unreadable job file")
                }
            }
        }
        Ok(by_symbol
            .into_iter()
            .map(|(symbol, rows)| (symbol, sort_dedup_keep_last(rows)))
            .collect())
    }

    /// Union of the symbol's partitions, optionally bounded by inclusive dates.
    pub fn load_symbol_data(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<Bar>, StorageError> {
        validate_symbol(symbol)?;
        let dir = symbol_dir(&self.root, timeframe, symbol);
        let mut rows = Vec::new();
        for (day, _) in day_dirs(&dir)? {
            if start.is_some_and(|s| day < s) || end.is_some_and(|e| day > e) {
                continue;
            }
            rows.extend(self.load_partition(timeframe, symbol, day)?);
        }
        Ok(rows)
    }

    // ── Administration ──────────────────────────────────────────────

    /// Remove every job file for `job_id`; returns how many were removed.
    pub fn delete_job(&self, job_id: &JobId) -> Result<usize, StorageError> {
        let mut removed = 0;
        for file in walk(&self.root)?.into_iter().filter(|f| &f.job_id == job_id) {
            let _lock = JobLock::acquire(&file.path, self.config.lock_timeout())?;
            match fs::remove_file(&file.path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => return Err(StorageError::io(&file.path, source)),
            }
        }
        info!(job_id = %job_id, removed, "deleted job");
        Ok(removed)
    }

    /// Distinct job ids with at least one file under `(timeframe, symbol)`.
    pub fn list_jobs(&self, timeframe: Timeframe, symbol: &str) -> Result<Vec<JobId>, StorageError> {
        validate_symbol(symbol)?;
        let dir = symbol_dir(&self.root, timeframe, symbol);
        let mut jobs = BTreeSet::new();
        for (_, day_path) in day_dirs(&dir)? {
            jobs.extend(job_files_in(&day_path)?.into_iter().map(|(job_id, _)| job_id));
        }
        Ok(jobs.into_iter().collect())
    }

    pub fn storage_stats(&self) -> Result<StorageStats, StorageError> {
        let files = walk(&self.root)?;
        let mut partitions = BTreeSet::new();
        let mut timeframes = BTreeSet::new();
        let mut symbols = BTreeSet::new();
        let mut job_ids = BTreeSet::new();
        let mut total_bytes = 0u64;

        for file in &files {
            total_bytes += fs::metadata(&file.path).map(|m| m.len()).unwrap_or(0);
            partitions.insert(file.key.clone());
            timeframes.insert(file.key.timeframe.to_string());
            symbols.insert(file.key.symbol.clone());
            job_ids.insert(file.job_id.to_string());
        }

        Ok(StorageStats {
            file_count: files.len(),
            total_bytes,
            partition_count: partitions.len(),
            earliest_day: files.iter().map(|f| f.key.day).min(),
            latest_day: files.iter().map(|f| f.key.day).max(),
            timeframes: timeframes.into_iter().collect(),
            symbols: symbols.into_iter().collect(),
            job_ids: job_ids.into_iter().collect(),
        })
    }

    /// Open every job file in parallel and report the ones that fail.
    pub fn validate_integrity(&self) -> Result<IntegrityReport, StorageError> {
        let files = walk(&self.root)?;
        let results: Vec<(PathBuf, Result<usize, StorageError>)> = files
            .into_par_iter()
            .map(|file| {
                let rows = count_rows(&file.path);
                (file.path, rows)
            })
            .collect();

        let mut report = IntegrityReport::default();
        for (path, result) in results {
            match result {
                Ok(rows) => {
                    report.valid_files += 1;
                    report.total_rows += rows;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "corrupted job file");
                    report.corrupted_files.push(CorruptFile {
                        path,
                        reason: e.to_string(),
                    });
                }
            }
        }
        report.is_healthy = report.corrupted_files.is_empty();
        info!(
            valid = report.valid_files,
            corrupted = report.corrupted_files.len(),
            rows = report.total_rows,
            "integrity scan complete"
        );
        Ok(report)
    }
}

fn checked_key(
    rows: &[Bar],
    timeframe: Timeframe,
    symbol: &str,
    day: NaiveDate,
) -> Result<PartitionKey, StorageError> {
    if rows.is_empty() {
        return Err(StorageError::EmptyInput);
    }
    validate_symbol(symbol)?;
    validate_partition_rows(rows, symbol, day)?;
    Ok(PartitionKey {
        timeframe,
        symbol: symbol.to_string(),
        day,
    })
}

/// `{job}.parquet.{pid}-{n}.tmp`, unique per process and call.
fn temp_path(path: &Path) -> PathBuf {
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{}-{n}.{TEMP_FILE_EXT}", std::process::id()));
    PathBuf::from(name)
}
