//! Hive-style partition layout.
//!
//! `{root}/timeframe={tf}/symbol={SYMBOL}/date={YYYY-MM-DD}/{job_id}.parquet`

use chrono::NaiveDate;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::StorageError;
use crate::domain::{JobId, Timeframe};

pub const JOB_FILE_EXT: &str = "parquet";
pub const LOCK_FILE_EXT: &str = "lock";
pub const TEMP_FILE_EXT: &str = "tmp";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// `(timeframe, symbol, trading_day)`: one partition directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKey {
    pub timeframe: Timeframe,
    pub symbol: String,
    pub day: NaiveDate,
}

/// A job file discovered by walking the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFile {
    pub key: PartitionKey,
    pub job_id: JobId,
    pub path: PathBuf,
}

/// Canonical ticker form: trimmed and ASCII uppercase, so `aapl` and `AAPL`
/// share one partition and one checkpoint.
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_ascii_uppercase()
}

/// Symbols become directory names, so they must be a single safe path component.
pub fn validate_symbol(symbol: &str) -> Result<(), StorageError> {
    let ok = !symbol.is_empty()
        && symbol != "."
        && symbol != ".."
        && symbol
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '^' | '='));
    if ok {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(format!(
            "symbol '{symbol}' is not a valid partition component"
        )))
    }
}

pub fn timeframe_dir(root: &Path, timeframe: Timeframe) -> PathBuf {
    root.join(format!("timeframe={timeframe}"))
}

pub fn symbol_dir(root: &Path, timeframe: Timeframe, symbol: &str) -> PathBuf {
    timeframe_dir(root, timeframe).join(format!("symbol={symbol}"))
}

pub fn partition_dir(root: &Path, key: &PartitionKey) -> PathBuf {
    symbol_dir(root, key.timeframe, &key.symbol)
        .join(format!("date={}", key.day.format(DATE_FORMAT)))
}

pub fn job_file_path(root: &Path, key: &PartitionKey, job_id: &JobId) -> PathBuf {
    partition_dir(root, key).join(format!("{job_id}.{JOB_FILE_EXT}"))
}

/// `{job}.parquet.lock` beside the job file.
pub fn lock_path(job_file: &Path) -> PathBuf {
    let mut name = job_file.as_os_str().to_owned();
    name.push(".");
    name.push(LOCK_FILE_EXT);
    PathBuf::from(name)
}

fn strip_prefix<'a>(name: &'a str, prefix: &str) -> Option<&'a str> {
    name.strip_prefix(prefix).filter(|rest| !rest.is_empty())
}

/// Sub-directories of `dir` named `{prefix}{value}`, as `(value, path)`.
fn hive_children(dir: &Path, prefix: &str) -> Result<Vec<(String, PathBuf)>, StorageError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => return Err(StorageError::io(dir, source)),
    };

    let mut out = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| StorageError::io(dir, source))?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        match strip_prefix(name, prefix) {
            Some(value) => out.push((value.to_string(), path.clone())),
            None => debug!(path = %path.display(), "ignoring non-partition directory"),
        }
    }
    out.sort();
    Ok(out)
}

/// Date partitions under one symbol directory.
pub fn day_dirs(symbol_dir: &Path) -> Result<Vec<(NaiveDate, PathBuf)>, StorageError> {
    Ok(hive_children(symbol_dir, "date=")?
        .into_iter()
        .filter_map(|(value, path)| match NaiveDate::parse_from_str(&value, DATE_FORMAT) {
            Ok(day) => Some((day, path)),
            Err(_) => {
                debug!(path = %path.display(), "ignoring unparseable date partition");
                None
            }
        })
        .collect())
}

/// Job files directly inside a partition directory, as `(job_id, path)`.
///
/// Temp and lock files are never returned.
pub fn job_files_in(dir: &Path) -> Result<Vec<(JobId, PathBuf)>, StorageError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => return Err(StorageError::io(dir, source)),
    };

    let mut out = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| StorageError::io(dir, source))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(JOB_FILE_EXT) || !path.is_file() {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        match JobId::new(stem) {
            Ok(job_id) => out.push((job_id, path)),
            Err(_) => debug!(path = %path.display(), "ignoring file with invalid job id"),
        }
    }
    out.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(out)
}

/// Every job file under `root`, in path order.
pub fn walk(root: &Path) -> Result<Vec<JobFile>, StorageError> {
    let mut files = Vec::new();
    for (tf_value, tf_path) in hive_children(root, "timeframe=")? {
        let Ok(timeframe) = tf_value.parse::<Timeframe>() else {
            debug!(path = %tf_path.display(), "ignoring unparseable timeframe partition");
            continue;
        };
        for (symbol, sym_path) in hive_children(&tf_path, "symbol=")? {
            for (day, day_path) in day_dirs(&sym_path)? {
                for (job_id, path) in job_files_in(&day_path)? {
                    files.push(JobFile {
                        key: PartitionKey {
                            timeframe,
                            symbol: symbol.clone(),
                            day,
                        },
                        job_id,
                        path,
                    });
                }
            }
        }
    }
    Ok(files)
}
