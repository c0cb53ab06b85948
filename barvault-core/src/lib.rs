//! BarVault Core: domain types, vendor connectors, checkpoints and the bar store.
//!
//! This crate contains everything below the ingestion coordinator:
//! - Domain types (bars, timeframes, job ids, fetch windows)
//! - Vendor connector contract with pagination, auth, rate limiting and retries
//! - Structural schema validation for bar batches and job files
//! - SQLite-backed per-symbol checkpoints
//! - Partitioned Parquet storage with interprocess file locking

pub mod checkpoint;
pub mod connector;
pub mod domain;
pub mod schema;
pub mod storage;
