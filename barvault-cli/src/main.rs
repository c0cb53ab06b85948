//! BarVault CLI: ingestion, storage inspection and checkpoint management.
//!
//! Commands:
//! - `ingest`: fetch bars for a TOML-configured run into the partitioned store
//! - `storage stats|integrity|list-jobs|delete-job|show`: inspect or prune the store
//! - `checkpoint show|reset`: read or clear per-symbol resume points
//!
//! Exit codes: 0 on success, 1 on hard failure or unhealthy store, 130 when
//! an ingestion run was interrupted.

use anyhow::{bail, Context, Result};
use barvault_core::checkpoint::{CheckpointStore, SqliteCheckpointStore};
use barvault_core::domain::{Bar, JobId, Timeframe};
use barvault_core::storage::layout::{normalize_symbol, walk};
use barvault_core::storage::{PartitionedStorageEngine, StorageConfig};
use barvault_runner::config::DEFAULT_CHECKPOINT_FILE;
use barvault_runner::{
    run_ingest, IngestConfig, RunError, RunProgress, RunSummary, SilentProgress, StdoutProgress,
};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const EXIT_FAILURE: u8 = 1;
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(name = "barvault", about = "BarVault: market bar ingestion into a partitioned Parquet store")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch bars for every configured symbol and write them to the store.
    Ingest {
        /// Path to the TOML run configuration.
        #[arg(long)]
        config: PathBuf,

        /// Override the symbol list (comma separated).
        #[arg(long, value_delimiter = ',')]
        symbols: Option<Vec<String>>,

        /// Override the window start (RFC 3339 or YYYY-MM-DD).
        #[arg(long)]
        start: Option<String>,

        /// Override the window end (RFC 3339 or YYYY-MM-DD, inclusive).
        #[arg(long)]
        end: Option<String>,

        /// Override the worker count.
        #[arg(long)]
        workers: Option<usize>,

        /// Override the job id.
        #[arg(long)]
        job_id: Option<String>,

        /// Print the run summary as JSON instead of text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Storage inspection and maintenance.
    Storage {
        #[command(subcommand)]
        action: StorageAction,
    },
    /// Checkpoint inspection and reset.
    Checkpoint {
        #[command(subcommand)]
        action: CheckpointAction,
    },
}

#[derive(Subcommand)]
enum StorageAction {
    /// File count, size, partitions, symbols and day range.
    Stats {
        #[arg(long, default_value = "data/bars")]
        root: PathBuf,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Open every job file and report unreadable ones.
    Integrity {
        #[arg(long, default_value = "data/bars")]
        root: PathBuf,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Job ids present for one symbol and timeframe.
    ListJobs {
        #[arg(long, default_value = "data/bars")]
        root: PathBuf,
        #[arg(long)]
        timeframe: Timeframe,
        #[arg(long, value_parser = parse_symbol)]
        symbol: String,
    },
    /// Remove every file written by a job.
    DeleteJob {
        #[arg(long, default_value = "data/bars")]
        root: PathBuf,
        #[arg(long)]
        job_id: JobId,
        /// Actually delete (without this flag, only previews what would be removed).
        #[arg(long, default_value_t = false)]
        confirm: bool,
    },
    /// Print the bars of one partition, or of one job file inside it.
    Show {
        #[arg(long, default_value = "data/bars")]
        root: PathBuf,
        #[arg(long)]
        timeframe: Timeframe,
        #[arg(long, value_parser = parse_symbol)]
        symbol: String,
        /// Trading day (YYYY-MM-DD).
        #[arg(long)]
        date: NaiveDate,
        #[arg(long)]
        job_id: Option<JobId>,
        /// Maximum rows to print.
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum CheckpointAction {
    /// Show the checkpoint for one symbol, or all of them.
    Show {
        #[arg(long, default_value_os_t = default_checkpoint_db())]
        db: PathBuf,
        #[arg(long, value_parser = parse_symbol)]
        symbol: Option<String>,
    },
    /// Forget a symbol's checkpoint so the next run refetches its full window.
    Reset {
        #[arg(long, default_value_os_t = default_checkpoint_db())]
        db: PathBuf,
        #[arg(long, value_parser = parse_symbol)]
        symbol: String,
    },
}

fn parse_symbol(raw: &str) -> Result<String, String> {
    Ok(normalize_symbol(raw))
}

fn default_checkpoint_db() -> PathBuf {
    Path::new("data/bars").join(DEFAULT_CHECKPOINT_FILE)
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Ingest {
            config,
            symbols,
            start,
            end,
            workers,
            job_id,
            json,
        } => run_ingest_cmd(config, symbols, start, end, workers, job_id, json),
        Commands::Storage { action } => run_storage(action),
        Commands::Checkpoint { action } => run_checkpoint(action).map(|()| ExitCode::SUCCESS),
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("barvault=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

// ── ingest ───────────────────────────────────────────────────────────

#[allow(clippy::too_many_arguments)]
fn run_ingest_cmd(
    config_path: PathBuf,
    symbols: Option<Vec<String>>,
    start: Option<String>,
    end: Option<String>,
    workers: Option<usize>,
    job_id: Option<String>,
    json: bool,
) -> Result<ExitCode> {
    let mut config = IngestConfig::load(&config_path)?;
    if let Some(symbols) = symbols {
        config.ingest.symbols = symbols
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }
    if let Some(start) = start {
        config.ingest.start = parse_instant(&start, false)?;
    }
    if let Some(end) = end {
        config.ingest.end = parse_instant(&end, true)?;
    }
    if let Some(workers) = workers {
        config.ingest.workers = workers;
    }
    if let Some(job_id) = job_id {
        config.ingest.job_id = Some(job_id.parse()?);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    let stdout_progress = (!json).then(|| Arc::new(StdoutProgress::new()));
    let progress: Arc<dyn RunProgress> = match &stdout_progress {
        Some(stdout) => Arc::clone(stdout) as Arc<dyn RunProgress>,
        None => Arc::new(SilentProgress),
    };

    let outcome = runtime.block_on(async {
        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling in-flight symbols");
                on_interrupt.cancel();
            }
        });
        run_ingest(&config, cancel, progress).await
    });
    if let Some(stdout) = &stdout_progress {
        println!("{} page(s) fetched", stdout.pages());
    }

    match outcome {
        Ok(summary) => {
            print_run_summary(&summary, json)?;
            if summary.was_cancelled() {
                Ok(ExitCode::from(EXIT_INTERRUPTED))
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }
        Err(RunError::AllFailed { summary }) => {
            print_run_summary(&summary, json)?;
            eprintln!("error: every symbol failed");
            Ok(ExitCode::from(EXIT_FAILURE))
        }
        Err(err) => Err(err.into()),
    }
}

/// RFC 3339, or a bare date meaning the start (or end) of that UTC day.
fn parse_instant(raw: &str, end_of_day: bool) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    let day = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("'{raw}' is neither RFC 3339 nor YYYY-MM-DD"))?;
    let time = if end_of_day {
        NaiveTime::from_hms_nano_opt(23, 59, 59, 999_999_999)
    } else {
        NaiveTime::from_hms_opt(0, 0, 0)
    };
    match time {
        Some(time) => Ok(day.and_time(time).and_utc()),
        None => bail!("invalid time of day for '{raw}'"),
    }
}

fn print_run_summary(summary: &RunSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
    } else {
        print!("{summary}");
    }
    Ok(())
}

// ── storage ──────────────────────────────────────────────────────────

fn open_store(root: &Path) -> Result<PartitionedStorageEngine> {
    if !root.is_dir() {
        bail!("storage root does not exist: {}", root.display());
    }
    Ok(PartitionedStorageEngine::new(root, StorageConfig::default())?)
}

fn run_storage(action: StorageAction) -> Result<ExitCode> {
    match action {
        StorageAction::Stats { root, json } => {
            let stats = open_store(&root)?.storage_stats()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("Storage: {}", root.display());
                println!("  Files:      {}", stats.file_count);
                println!("  Size:       {:.2} MB", stats.total_bytes as f64 / (1024.0 * 1024.0));
                println!("  Partitions: {}", stats.partition_count);
                println!("  Timeframes: {}", stats.timeframes.join(", "));
                println!("  Symbols:    {}", stats.symbols.len());
                println!("  Jobs:       {}", stats.job_ids.len());
                if let (Some(first), Some(last)) = (stats.earliest_day, stats.latest_day) {
                    println!("  Days:       {first} to {last}");
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        StorageAction::Integrity { root, json } => {
            let report = open_store(&root)?.validate_integrity()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "{} valid file(s), {} row(s), {} corrupted",
                    report.valid_files,
                    report.total_rows,
                    report.corrupted_files.len()
                );
                for bad in &report.corrupted_files {
                    println!("  CORRUPT {}: {}", bad.path.display(), bad.reason);
                }
            }
            Ok(if report.is_healthy {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_FAILURE)
            })
        }
        StorageAction::ListJobs {
            root,
            timeframe,
            symbol,
        } => {
            for job in open_store(&root)?.list_jobs(timeframe, &symbol)? {
                println!("{job}");
            }
            Ok(ExitCode::SUCCESS)
        }
        StorageAction::DeleteJob {
            root,
            job_id,
            confirm,
        } => {
            let store = open_store(&root)?;
            if !confirm {
                let files: Vec<_> = walk(store.root())?
                    .into_iter()
                    .filter(|f| f.job_id == job_id)
                    .collect();
                println!("Would remove {} file(s) for job {job_id}:", files.len());
                for file in &files {
                    println!("  {}", file.path.display());
                }
                println!("Re-run with --confirm to delete.");
                return Ok(ExitCode::SUCCESS);
            }
            let removed = store.delete_job(&job_id)?;
            info!(job_id = %job_id, removed, "job deleted");
            println!("Removed {removed} file(s) for job {job_id}");
            Ok(ExitCode::SUCCESS)
        }
        StorageAction::Show {
            root,
            timeframe,
            symbol,
            date,
            job_id,
            limit,
        } => {
            let store = open_store(&root)?;
            let bars = match &job_id {
                Some(job) => store.load_job_file(timeframe, &symbol, date, job)?,
                None => store.load_partition(timeframe, &symbol, date)?,
            };
            print_bars(&bars, limit);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_bars(bars: &[Bar], limit: usize) {
    println!(
        "{:<30} {:>10} {:>10} {:>10} {:>10} {:>12} {:>8} {:>10}",
        "timestamp", "open", "high", "low", "close", "volume", "trades", "vwap"
    );
    for bar in bars.iter().take(limit) {
        let trades = bar.trade_count.map_or("-".to_string(), |n| n.to_string());
        let vwap = bar.vwap.map_or("-".to_string(), |v| format!("{v:.4}"));
        println!(
            "{:<30} {:>10.4} {:>10.4} {:>10.4} {:>10.4} {:>12} {:>8} {:>10}",
            bar.timestamp().to_rfc3339(),
            bar.open,
            bar.high,
            bar.low,
            bar.close,
            bar.volume,
            trades,
            vwap
        );
    }
    if bars.len() > limit {
        println!("... {} more row(s)", bars.len() - limit);
    }
}

// ── checkpoint ───────────────────────────────────────────────────────

fn run_checkpoint(action: CheckpointAction) -> Result<()> {
    match action {
        CheckpointAction::Show { db, symbol } => {
            if !db.exists() {
                bail!("checkpoint database does not exist: {}", db.display());
            }
            let store = SqliteCheckpointStore::open(&db)?;
            let rows = match symbol {
                Some(symbol) => store
                    .get(&symbol)?
                    .map(|ts| vec![(symbol, ts)])
                    .unwrap_or_default(),
                None => store.all()?,
            };
            if rows.is_empty() {
                println!("No checkpoints.");
            }
            for (symbol, ts) in rows {
                let at = DateTime::<Utc>::from_timestamp_nanos(ts).to_rfc3339();
                println!("{symbol:<12} {at}  ({ts})");
            }
            Ok(())
        }
        CheckpointAction::Reset { db, symbol } => {
            let store = SqliteCheckpointStore::open(&db)?;
            if store.reset(&symbol)? {
                println!("Checkpoint for {symbol} cleared.");
            } else {
                println!("No checkpoint for {symbol}.");
            }
            Ok(())
        }
    }
}
