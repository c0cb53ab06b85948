//! Run summary: the only record of what a coordinator run did.
//!
//! Owned and mutated by the aggregating loop alone; units report into it
//! over a channel and never touch it directly.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Where in the unit a symbol failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Checkpoint,
    Fetch,
    Validation,
    Storage,
    Worker,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureStage::Checkpoint => "checkpoint",
            FailureStage::Fetch => "fetch",
            FailureStage::Validation => "validation",
            FailureStage::Storage => "storage",
            FailureStage::Worker => "worker",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolFailure {
    pub symbol: String,
    pub stage: FailureStage,
    pub message: String,
}

/// How one symbol's unit ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SymbolOutcome {
    /// Bars written and the checkpoint advanced to `last_ts_ns`.
    /// `last_ts_ns` is `None` when the vendor had nothing new.
    Ingested { bars: usize, last_ts_ns: Option<i64> },
    /// The checkpoint already covers the whole window.
    Skipped { checkpoint_ns: i64 },
    Failed(SymbolFailure),
    Cancelled,
}

impl SymbolOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SymbolOutcome::Ingested { .. } | SymbolOutcome::Skipped { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub job_id: String,
    /// Units that ran to an outcome (ingested, skipped or failed).
    pub symbols_processed: usize,
    pub total_bars: usize,
    pub succeeded: Vec<String>,
    pub skipped: Vec<String>,
    pub errors: Vec<SymbolFailure>,
    /// Symbols whose unit was abandoned by a cancellation request.
    pub cancelled: Vec<String>,
    pub bars_by_symbol: BTreeMap<String, usize>,
    pub elapsed_ms: u64,
}

impl RunSummary {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            ..Self::default()
        }
    }

    pub fn record(&mut self, symbol: &str, outcome: SymbolOutcome) {
        match outcome {
            SymbolOutcome::Ingested { bars, .. } => {
                self.symbols_processed += 1;
                self.total_bars += bars;
                self.succeeded.push(symbol.to_string());
                self.bars_by_symbol.insert(symbol.to_string(), bars);
            }
            SymbolOutcome::Skipped { .. } => {
                self.symbols_processed += 1;
                self.skipped.push(symbol.to_string());
            }
            SymbolOutcome::Failed(failure) => {
                self.symbols_processed += 1;
                self.errors.push(failure);
            }
            SymbolOutcome::Cancelled => self.cancelled.push(symbol.to_string()),
        }
    }

    /// Ingested plus skipped: symbols whose data is current after this run.
    pub fn success_count(&self) -> usize {
        self.succeeded.len() + self.skipped.len()
    }

    pub fn was_cancelled(&self) -> bool {
        !self.cancelled.is_empty()
    }

    /// Zero symbols succeeded and at least one failed.
    pub fn is_hard_failure(&self) -> bool {
        self.success_count() == 0 && !self.errors.is_empty()
    }

    /// Sort every list so output does not depend on completion order.
    pub(crate) fn normalize(&mut self) {
        self.succeeded.sort();
        self.skipped.sort();
        self.cancelled.sort();
        self.errors.sort_by(|a, b| a.symbol.cmp(&b.symbol));
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "job {}", self.job_id)?;
        writeln!(
            f,
            "  processed {} symbol(s) in {:.1}s: {} ingested, {} skipped, {} failed",
            self.symbols_processed,
            self.elapsed_ms as f64 / 1000.0,
            self.succeeded.len(),
            self.skipped.len(),
            self.errors.len()
        )?;
        writeln!(f, "  bars written: {}", self.total_bars)?;
        for failure in &self.errors {
            writeln!(
                f,
                "  FAILED {} ({}): {}",
                failure.symbol, failure.stage, failure.message
            )?;
        }
        if self.was_cancelled() {
            writeln!(f, "  cancelled: {}", self.cancelled.join(", "))?;
        }
        Ok(())
    }
}
