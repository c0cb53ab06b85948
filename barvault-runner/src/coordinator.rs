//! Ingestion coordinator: one fetch → validate → write → checkpoint unit per
//! symbol, on a bounded pool of tokio tasks.
//!
//! Units never share mutable state. Each reports [`UnitEvent`]s over an mpsc
//! channel and the aggregating loop in [`IngestionCoordinator::run`] is the
//! sole owner of the [`RunSummary`] and the sole caller of [`RunProgress`].

use crate::config::{ConfigError, IngestConfig};
use crate::progress::RunProgress;
use crate::summary::{FailureStage, RunSummary, SymbolFailure, SymbolOutcome};
use barvault_core::checkpoint::{CheckpointError, CheckpointStore, SqliteCheckpointStore};
use barvault_core::connector::{ConnectorClient, ConnectorError};
use barvault_core::domain::{sort_dedup_keep_last, Bar, JobId, TimeWindow, Timeframe};
use barvault_core::schema::{validate_batch, SchemaError};
use barvault_core::storage::layout::normalize_symbol;
use barvault_core::storage::{PartitionedStorageEngine, StorageError};
use chrono::NaiveDate;
use futures::TryStreamExt;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("cannot open storage: {0}")]
    Storage(#[from] StorageError),

    #[error("cannot open checkpoint store: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("cannot build connector: {0}")]
    Connector(#[from] ConnectorError),

    #[error("all {} symbol(s) failed", .summary.errors.len())]
    AllFailed { summary: Box<RunSummary> },
}

/// Why a single unit stopped short.
#[derive(Debug, Error)]
enum UnitError {
    #[error("{0}")]
    Checkpoint(#[from] CheckpointError),
    #[error("{0}")]
    Fetch(#[from] ConnectorError),
    #[error("{0}")]
    Validation(#[from] SchemaError),
    #[error("{0}")]
    Storage(#[from] StorageError),
    #[error("{0}")]
    Worker(String),
}

impl UnitError {
    fn stage(&self) -> FailureStage {
        match self {
            UnitError::Checkpoint(_) => FailureStage::Checkpoint,
            UnitError::Fetch(_) => FailureStage::Fetch,
            UnitError::Validation(_) => FailureStage::Validation,
            UnitError::Storage(_) => FailureStage::Storage,
            UnitError::Worker(_) => FailureStage::Worker,
        }
    }

    fn into_outcome(self, symbol: &str) -> SymbolOutcome {
        SymbolOutcome::Failed(SymbolFailure {
            symbol: symbol.to_string(),
            stage: self.stage(),
            message: self.to_string(),
        })
    }
}

/// Messages from units to the aggregating loop.
#[derive(Debug)]
enum UnitEvent {
    Started { index: usize },
    Batch { index: usize, bars: usize },
    Finished { index: usize, outcome: SymbolOutcome },
}

/// Where a unit stands once its fetch phase ends.
enum UnitStage {
    Done(SymbolOutcome),
    Write(PendingWrite),
}

/// Validated bars waiting for storage.
struct PendingWrite {
    bars: Vec<Bar>,
    resumed: bool,
}

/// Shared, read-only state handed to every unit.
struct UnitContext {
    client: Arc<ConnectorClient>,
    storage: PartitionedStorageEngine,
    checkpoints: Arc<dyn CheckpointStore>,
    timeframe: Timeframe,
    job_id: JobId,
}

pub struct IngestionCoordinator {
    ctx: Arc<UnitContext>,
    progress: Arc<dyn RunProgress>,
}

impl IngestionCoordinator {
    pub fn new(
        client: Arc<ConnectorClient>,
        storage: PartitionedStorageEngine,
        checkpoints: Arc<dyn CheckpointStore>,
        timeframe: Timeframe,
        job_id: JobId,
    ) -> Self {
        Self {
            ctx: Arc::new(UnitContext {
                client,
                storage,
                checkpoints,
                timeframe,
                job_id,
            }),
            progress: Arc::new(crate::progress::SilentProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn RunProgress>) -> Self {
        self.progress = progress;
        self
    }

    pub fn job_id(&self) -> &JobId {
        &self.ctx.job_id
    }

    /// Ingest `window` for every symbol with at most `workers` units in flight.
    ///
    /// Per-symbol failures land in the summary. Returns
    /// [`RunError::AllFailed`] only when no symbol succeeded and the run was
    /// not cancelled. After `cancel` fires, queued units never start and
    /// fetching units are dropped at their next await point; the returned
    /// summary lists them under `cancelled`. A unit already writing finishes
    /// its write and advances its checkpoint only if the token is still clear
    /// at that point.
    pub async fn run(
        &self,
        symbols: &[String],
        window: TimeWindow,
        workers: usize,
        cancel: CancellationToken,
    ) -> Result<RunSummary, RunError> {
        let started = Instant::now();
        // At most one unit per symbol, keyed by its canonical form.
        let mut seen = HashSet::new();
        let symbols: Vec<String> = symbols
            .iter()
            .map(|s| normalize_symbol(s))
            .filter(|s| seen.insert(s.clone()))
            .collect();
        let total = symbols.len();
        let pool = workers.max(1).min(total.max(1));
        info!(
            job_id = %self.ctx.job_id,
            provider = self.ctx.client.provider_name(),
            symbols = total,
            workers = pool,
            timeframe = %self.ctx.timeframe,
            "ingestion run starting"
        );

        let semaphore = Arc::new(Semaphore::new(pool));
        let (tx, mut rx) = mpsc::unbounded_channel::<UnitEvent>();
        let mut units = JoinSet::new();

        for (index, symbol) in symbols.iter().enumerate() {
            let ctx = Arc::clone(&self.ctx);
            let semaphore = Arc::clone(&semaphore);
            let tx = tx.clone();
            let cancel = cancel.clone();
            let symbol = symbol.clone();
            units.spawn(async move {
                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };
                let Some(_permit) = permit else {
                    let _ = tx.send(UnitEvent::Finished {
                        index,
                        outcome: SymbolOutcome::Cancelled,
                    });
                    return;
                };

                let _ = tx.send(UnitEvent::Started { index });
                let staged = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!(symbol = %symbol, "unit dropped on cancellation");
                        Ok(UnitStage::Done(SymbolOutcome::Cancelled))
                    }
                    result = ctx.fetch_symbol(index, &symbol, window, &tx) => result,
                };
                // A started write is never dropped: the outcome reports what it did.
                let result = match staged {
                    Ok(UnitStage::Done(outcome)) => Ok(outcome),
                    Ok(UnitStage::Write(pending)) => ctx.write_symbol(&symbol, pending, &cancel).await,
                    Err(err) => Err(err),
                };
                let outcome = result.unwrap_or_else(|err| {
                    warn!(symbol = %symbol, stage = %err.stage(), error = %err, "unit failed");
                    err.into_outcome(&symbol)
                });
                let _ = tx.send(UnitEvent::Finished { index, outcome });
            });
        }
        drop(tx);

        let mut summary = RunSummary::new(self.ctx.job_id.as_str());
        let mut pending: HashSet<usize> = (0..total).collect();
        let mut done = 0usize;
        while let Some(event) = rx.recv().await {
            match event {
                UnitEvent::Started { index } => {
                    self.progress.on_start(&symbols[index], index, total);
                }
                UnitEvent::Batch { index, bars } => {
                    self.progress.on_batch_complete(&symbols[index], bars);
                }
                UnitEvent::Finished { index, outcome } => {
                    pending.remove(&index);
                    done += 1;
                    self.progress.on_complete(&symbols[index], done, total, &outcome);
                    summary.record(&symbols[index], outcome);
                }
            }
        }

        // A unit that never reported panicked or was aborted.
        while let Some(joined) = units.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "ingestion unit aborted");
            }
        }
        let mut orphans: Vec<usize> = pending.into_iter().collect();
        orphans.sort_unstable();
        for index in orphans {
            let outcome = UnitError::Worker("unit ended without reporting".into())
                .into_outcome(&symbols[index]);
            done += 1;
            self.progress.on_complete(&symbols[index], done, total, &outcome);
            summary.record(&symbols[index], outcome);
        }

        summary.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        summary.normalize();
        info!(
            job_id = %summary.job_id,
            processed = summary.symbols_processed,
            succeeded = summary.succeeded.len(),
            skipped = summary.skipped.len(),
            failed = summary.errors.len(),
            cancelled = summary.cancelled.len(),
            bars = summary.total_bars,
            elapsed_ms = summary.elapsed_ms,
            "ingestion run finished"
        );

        if summary.is_hard_failure() && !summary.was_cancelled() {
            return Err(RunError::AllFailed {
                summary: Box::new(summary),
            });
        }
        Ok(summary)
    }
}

impl UnitContext {
    /// Checkpoint lookup, fetch and validation. Safe to drop at any await.
    async fn fetch_symbol(
        &self,
        index: usize,
        symbol: &str,
        window: TimeWindow,
        events: &mpsc::UnboundedSender<UnitEvent>,
    ) -> Result<UnitStage, UnitError> {
        let checkpoint = {
            let checkpoints = Arc::clone(&self.checkpoints);
            let key = symbol.to_string();
            tokio::task::spawn_blocking(move || checkpoints.get(&key))
                .await
                .map_err(|e| UnitError::Worker(e.to_string()))??
        };
        let Some(effective) = window.after_checkpoint(checkpoint) else {
            let checkpoint_ns = checkpoint.unwrap_or(window.end_ns());
            info!(symbol, checkpoint_ns, "window already covered by checkpoint");
            return Ok(UnitStage::Done(SymbolOutcome::Skipped { checkpoint_ns }));
        };

        let mut bars: Vec<Bar> = Vec::new();
        let mut pages = self.client.paginate(
            symbol,
            self.timeframe,
            effective.start_ms(),
            effective.end_ms(),
        );
        while let Some(page) = pages.try_next().await? {
            let _ = events.send(UnitEvent::Batch {
                index,
                bars: page.len(),
            });
            bars.extend(page);
        }
        drop(pages);
        bars.retain(|bar| effective.contains(bar.ts_ns));
        let bars = sort_dedup_keep_last(bars);

        if bars.is_empty() {
            info!(symbol, "no new bars in window");
            return Ok(UnitStage::Done(SymbolOutcome::Ingested {
                bars: 0,
                last_ts_ns: None,
            }));
        }
        validate_batch(&bars)?;
        Ok(UnitStage::Write(PendingWrite {
            bars,
            resumed: checkpoint.is_some(),
        }))
    }

    async fn write_symbol(
        &self,
        symbol: &str,
        pending: PendingWrite,
        cancel: &CancellationToken,
    ) -> Result<SymbolOutcome, UnitError> {
        let storage = self.storage.clone();
        let checkpoints = Arc::clone(&self.checkpoints);
        let timeframe = self.timeframe;
        let job_id = self.job_id.clone();
        let cancel = cancel.clone();
        let symbol = symbol.to_string();
        tokio::task::spawn_blocking(move || {
            persist(
                &storage,
                checkpoints.as_ref(),
                &symbol,
                pending.bars,
                timeframe,
                &job_id,
                pending.resumed,
                &cancel,
            )
        })
        .await
        .map_err(|e| UnitError::Worker(e.to_string()))?
    }
}

/// Write the unit's bars, then advance the checkpoint unless cancelled.
///
/// A fresh unit overwrites each day's job file. A resumed unit merges into
/// it, since the checkpoint-adjusted window may start partway through a day
/// whose earlier rows this job already wrote.
#[allow(clippy::too_many_arguments)]
fn persist(
    storage: &PartitionedStorageEngine,
    checkpoints: &dyn CheckpointStore,
    symbol: &str,
    bars: Vec<Bar>,
    timeframe: Timeframe,
    job_id: &JobId,
    resumed: bool,
    cancel: &CancellationToken,
) -> Result<SymbolOutcome, UnitError> {
    let count = bars.len();
    let last_ts_ns = bars.iter().map(|b| b.ts_ns).max();

    if resumed {
        let mut by_day: BTreeMap<NaiveDate, Vec<Bar>> = BTreeMap::new();
        for bar in bars {
            by_day.entry(bar.trading_day()).or_default().push(bar);
        }
        for (day, rows) in by_day {
            storage.append_to_job(&rows, timeframe, symbol, day, job_id)?;
        }
    } else {
        storage.store_bars(&bars, timeframe, job_id, true)?;
    }

    if cancel.is_cancelled() {
        info!(symbol, bars = count, "cancelled after write; checkpoint not advanced");
        return Ok(SymbolOutcome::Cancelled);
    }
    if let Some(ts) = last_ts_ns {
        checkpoints.set(symbol, ts)?;
    }
    info!(symbol, bars = count, last_ts_ns, resumed, "symbol ingested");
    Ok(SymbolOutcome::Ingested {
        bars: count,
        last_ts_ns,
    })
}

/// Open storage, checkpoints and the vendor client described by `config`
/// and run one ingestion.
pub async fn run_ingest(
    config: &IngestConfig,
    cancel: CancellationToken,
    progress: Arc<dyn RunProgress>,
) -> Result<RunSummary, RunError> {
    config.validate()?;
    let window = config.window()?;
    let storage = PartitionedStorageEngine::new(
        config.storage.root.clone(),
        config.storage.settings.clone(),
    )?;
    let checkpoints: Arc<dyn CheckpointStore> =
        Arc::new(SqliteCheckpointStore::open(config.checkpoint_path())?);
    let client = ConnectorClient::for_provider_with(
        config.provider.kind,
        config.client_config()?,
        &config.provider.vendor_options(),
    )?;

    IngestionCoordinator::new(
        Arc::new(client),
        storage,
        checkpoints,
        config.ingest.timeframe,
        config.job_id(),
    )
    .with_progress(progress)
    .run(&config.ingest.symbols, window, config.ingest.workers, cancel)
    .await
}
