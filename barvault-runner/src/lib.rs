//! BarVault Runner: ingestion orchestration on top of `barvault-core`.
//!
//! This crate provides:
//! - TOML run configuration with validation and credential resolution
//! - The ingestion coordinator (bounded worker pool, checkpoint resumption,
//!   cooperative cancellation)
//! - Run summaries and progress callbacks for the CLI

pub mod config;
pub mod coordinator;
pub mod progress;
pub mod summary;

pub use config::{
    CheckpointSection, ConfigError, IngestConfig, IngestSection, ProviderSection, StorageSection,
};
pub use coordinator::{run_ingest, IngestionCoordinator, RunError};
pub use progress::{RunProgress, SilentProgress, StdoutProgress};
pub use summary::{FailureStage, RunSummary, SymbolFailure, SymbolOutcome};
