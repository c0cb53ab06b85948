//! The canonical OHLCV record every connector produces and the store persists.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One OHLCV bar for a symbol at a fixed resolution.
///
/// `ts_ns` is nanoseconds since the Unix epoch (UTC). Vendor fields that may be
/// missing (`trade_count`, `vwap`) are `None` when absent, never a placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub ts_ns: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    pub trade_count: Option<u64>,
    pub vwap: Option<f64>,
}

impl Bar {
    /// Bar timestamp as a UTC instant.
    pub fn timestamp(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.ts_ns)
    }

    /// The trading day this bar is partitioned under (UTC calendar date).
    pub fn trading_day(&self) -> NaiveDate {
        self.timestamp().date_naive()
    }
}

/// Sort ascending by timestamp; of several bars sharing a timestamp the one
/// that came last in `bars` survives.
pub fn sort_dedup_keep_last(mut bars: Vec<Bar>) -> Vec<Bar> {
    bars.sort_by_key(|bar| bar.ts_ns);
    let mut unique: Vec<Bar> = Vec::with_capacity(bars.len());
    for bar in bars {
        match unique.last_mut() {
            Some(last) if last.ts_ns == bar.ts_ns => *last = bar,
            _ => unique.push(bar),
        }
    }
    unique
}

/// Nanoseconds since epoch for a UTC instant, saturating outside the i64 range.
pub fn to_nanos(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_nanos_opt().unwrap_or(if ts.timestamp() < 0 {
        i64::MIN
    } else {
        i64::MAX
    })
}
