//! Progress callbacks for ingestion runs.
//!
//! Invoked only from the coordinator's aggregating loop, so implementations
//! see events one at a time even though units run concurrently.

use crate::summary::SymbolOutcome;
use std::sync::atomic::{AtomicUsize, Ordering};

pub trait RunProgress: Send + Sync {
    /// A unit acquired a worker slot. `index` is the symbol's position in the run.
    fn on_start(&self, symbol: &str, index: usize, total: usize);

    /// One vendor page of `bars` bars arrived for `symbol`.
    fn on_batch_complete(&self, symbol: &str, bars: usize);

    /// A unit finished; `done` counts finished units including this one.
    fn on_complete(&self, symbol: &str, done: usize, total: usize, outcome: &SymbolOutcome);
}

/// Discards every event.
pub struct SilentProgress;

impl RunProgress for SilentProgress {
    fn on_start(&self, _symbol: &str, _index: usize, _total: usize) {}
    fn on_batch_complete(&self, _symbol: &str, _bars: usize) {}
    fn on_complete(&self, _symbol: &str, _done: usize, _total: usize, _outcome: &SymbolOutcome) {}
}

/// One line per unit start and finish on stdout.
#[derive(Default)]
pub struct StdoutProgress {
    pages: AtomicUsize,
}

impl StdoutProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pages received so far across all symbols.
    pub fn pages(&self) -> usize {
        self.pages.load(Ordering::Relaxed)
    }
}

impl RunProgress for StdoutProgress {
    fn on_start(&self, symbol: &str, index: usize, total: usize) {
        println!("[{}/{}] {symbol}: fetching", index + 1, total);
    }

    fn on_batch_complete(&self, _symbol: &str, _bars: usize) {
        self.pages.fetch_add(1, Ordering::Relaxed);
    }

    fn on_complete(&self, symbol: &str, done: usize, total: usize, outcome: &SymbolOutcome) {
        let status = match outcome {
            SymbolOutcome::Ingested { bars, .. } => format!("{bars} bars"),
            SymbolOutcome::Skipped { .. } => "up to date".to_string(),
            SymbolOutcome::Failed(failure) => format!("FAILED ({}): {}", failure.stage, failure.message),
            SymbolOutcome::Cancelled => "cancelled".to_string(),
        };
        println!("[{done}/{total}] {symbol}: {status}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stdout_progress_counts_pages_across_symbols() {
        let progress = StdoutProgress::new();
        progress.on_batch_complete("AAPL", 100);
        progress.on_batch_complete("MSFT", 0);
        progress.on_batch_complete("AAPL", 7);
        assert_eq!(progress.pages(), 3);
    }
}
