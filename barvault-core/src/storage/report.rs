use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::layout::PartitionKey;
use crate::domain::{JobId, Timeframe};

/// One job file written by `store_bars`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionRecord {
    pub timeframe: Timeframe,
    pub symbol: String,
    pub day: NaiveDate,
    pub job_id: JobId,
    pub path: PathBuf,
    pub rows: usize,
}

impl PartitionRecord {
    pub(crate) fn new(key: PartitionKey, job_id: JobId, path: PathBuf, rows: usize) -> Self {
        Self {
            timeframe: key.timeframe,
            symbol: key.symbol,
            day: key.day,
            job_id,
            path,
            rows,
        }
    }
}

/// Whole-store summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageStats {
    pub file_count: usize,
    pub total_bytes: u64,
    pub partition_count: usize,
    pub timeframes: Vec<String>,
    pub symbols: Vec<String>,
    pub job_ids: Vec<String>,
    pub earliest_day: Option<NaiveDate>,
    pub latest_day: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorruptFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Result of opening every stored file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub valid_files: usize,
    pub corrupted_files: Vec<CorruptFile>,
    pub total_rows: usize,
    pub is_healthy: bool,
}
