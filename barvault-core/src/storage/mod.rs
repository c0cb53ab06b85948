//! Partitioned, lock-protected Parquet bar store.
//!
//! Layout: `{root}/timeframe={tf}/symbol={SYMBOL}/date={YYYY-MM-DD}/{job_id}.parquet`
//!
//! - One job file per `(timeframe, symbol, trading_day, job_id)`
//! - Writes go to a temp file in the partition, are fsynced, then renamed
//! - An fs2 lock file per job file serialises writers across processes
//! - Corrupt files are skipped on reads and reported by integrity scans

pub mod engine;
pub mod frame;
pub mod layout;
pub mod lock;
pub mod report;

pub use engine::{merge_rows, PartitionedStorageEngine};
pub use layout::{JobFile, PartitionKey};
pub use report::{CorruptFile, IntegrityReport, PartitionRecord, StorageStats};

use polars::prelude::{ParquetCompression, PolarsError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::schema::SchemaError;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("job file already exists: {}", path.display())]
    AlreadyExists { path: PathBuf },

    #[error("refusing to write an empty row set")]
    EmptyInput,

    #[error("schema validation failed: {0}")]
    Schema(#[from] SchemaError),

    #[error("invalid partition key: {0}")]
    InvalidKey(String),

    #[error("timed out after {waited:?} waiting for lock {}", path.display())]
    LockTimeout { path: PathBuf, waited: Duration },

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parquet error at {}: {source}", path.display())]
    Parquet {
        path: PathBuf,
        #[source]
        source: PolarsError,
    },

    #[error("not found: {}", path.display())]
    NotFound { path: PathBuf },
}

impl StorageError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn parquet(path: &Path, source: PolarsError) -> Self {
        Self::Parquet {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Parquet codec for job files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    Snappy,
    Zstd,
    Lz4,
    Gzip,
    Uncompressed,
}

impl From<Compression> for ParquetCompression {
    fn from(c: Compression) -> Self {
        match c {
            Compression::Snappy => ParquetCompression::Snappy,
            Compression::Zstd => ParquetCompression::Zstd(None),
            Compression::Lz4 => ParquetCompression::Lz4Raw,
            Compression::Gzip => ParquetCompression::Gzip(None),
            Compression::Uncompressed => ParquetCompression::Uncompressed,
        }
    }
}

fn default_row_group_size() -> usize {
    128 * 1024
}

fn default_lock_timeout_ms() -> u64 {
    30_000
}

/// Write-side tuning, usually read from the `[storage]` config table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub compression: Compression,
    #[serde(default = "default_row_group_size")]
    pub row_group_size: usize,
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            compression: Compression::default(),
            row_group_size: default_row_group_size(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

impl StorageConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }
}
