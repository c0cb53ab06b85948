//! Inclusive fetch window in nanoseconds, and its checkpoint-adjusted form.

use super::bar::to_nanos;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    start_ns: i64,
    end_ns: i64,
}

#[derive(Debug, Error, PartialEq)]
#[error("invalid window: start {start_ns} is after end {end_ns}")]
pub struct WindowError {
    pub start_ns: i64,
    pub end_ns: i64,
}

impl TimeWindow {
    pub fn new(start_ns: i64, end_ns: i64) -> Result<Self, WindowError> {
        if start_ns > end_ns {
            return Err(WindowError { start_ns, end_ns });
        }
        Ok(Self { start_ns, end_ns })
    }

    pub fn from_datetimes(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, WindowError> {
        Self::new(to_nanos(start), to_nanos(end))
    }

    pub fn start_ns(&self) -> i64 {
        self.start_ns
    }

    pub fn end_ns(&self) -> i64 {
        self.end_ns
    }

    pub fn start_ms(&self) -> i64 {
        self.start_ns.div_euclid(1_000_000)
    }

    /// End in whole milliseconds, rounded up so the last nanosecond stays covered.
    pub fn end_ms(&self) -> i64 {
        let ms = self.end_ns.div_euclid(1_000_000);
        if self.end_ns.rem_euclid(1_000_000) == 0 {
            ms
        } else {
            ms.saturating_add(1)
        }
    }

    pub fn contains(&self, ts_ns: i64) -> bool {
        ts_ns >= self.start_ns && ts_ns <= self.end_ns
    }

    /// Window remaining after a checkpoint at `checkpoint_ns`.
    ///
    /// Returns `None` when everything requested is at or before the checkpoint.
    pub fn after_checkpoint(&self, checkpoint_ns: Option<i64>) -> Option<Self> {
        match checkpoint_ns {
            None => Some(*self),
            Some(cp) if self.end_ns <= cp => None,
            Some(cp) => Some(Self {
                start_ns: self.start_ns.max(cp.saturating_add(1)),
                end_ns: self.end_ns,
            }),
        }
    }
}
