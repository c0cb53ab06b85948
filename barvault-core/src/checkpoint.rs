//! Durable per-symbol resumption state.
//!
//! One row per symbol holding the newest timestamp known to be persisted.
//! The coordinator reads it before a unit of work and upserts it only after
//! the storage write for that unit succeeded.

use rusqlite::{params, Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

const CHECKPOINT_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS checkpoints (
    symbol  TEXT PRIMARY KEY,
    last_ts INTEGER NOT NULL
);
";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to prepare checkpoint path {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Symbol → last persisted timestamp (ns).
pub trait CheckpointStore: Send + Sync {
    fn get(&self, symbol: &str) -> Result<Option<i64>, CheckpointError>;

    /// Insert or overwrite the checkpoint for `symbol`.
    fn set(&self, symbol: &str, ts_ns: i64) -> Result<(), CheckpointError>;

    /// Administrative delete. Returns whether a checkpoint existed.
    fn reset(&self, symbol: &str) -> Result<bool, CheckpointError>;

    /// Every checkpoint, ordered by symbol.
    fn all(&self) -> Result<Vec<(String, i64)>, CheckpointError>;
}

/// SQLite-backed store, safe to share between threads and processes.
#[derive(Debug)]
pub struct SqliteCheckpointStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteCheckpointStore {
    /// Open (or create) the database at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CheckpointError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| CheckpointError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        // journal_mode returns the resulting mode as a row.
        let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        if !mode.eq_ignore_ascii_case("wal") {
            warn!(path = %path.display(), mode = %mode, "checkpoint database not in WAL mode");
        }
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        conn.execute_batch(CHECKPOINT_SCHEMA)?;
        debug!(path = %path.display(), "opened checkpoint store");

        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn open_in_memory() -> Result<Self, CheckpointError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(CHECKPOINT_SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    /// Database file, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            warn!("checkpoint connection mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

impl CheckpointStore for SqliteCheckpointStore {
    fn get(&self, symbol: &str) -> Result<Option<i64>, CheckpointError> {
        let conn = self.conn();
        let result = conn.query_row(
            "SELECT last_ts FROM checkpoints WHERE symbol = ?1",
            params![symbol],
            |row| row.get(0),
        );
        match result {
            Ok(ts) => Ok(Some(ts)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, symbol: &str, ts_ns: i64) -> Result<(), CheckpointError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO checkpoints (symbol, last_ts) VALUES (?1, ?2)
             ON CONFLICT(symbol) DO UPDATE SET last_ts = excluded.last_ts",
            params![symbol, ts_ns],
        )?;
        debug!(symbol, ts_ns, "checkpoint advanced");
        Ok(())
    }

    fn reset(&self, symbol: &str) -> Result<bool, CheckpointError> {
        let conn = self.conn();
        let removed = conn.execute("DELETE FROM checkpoints WHERE symbol = ?1", params![symbol])?;
        Ok(removed > 0)
    }

    fn all(&self) -> Result<Vec<(String, i64)>, CheckpointError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT symbol, last_ts FROM checkpoints ORDER BY symbol")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_missing_is_none() {
        let store = SqliteCheckpointStore::open_in_memory().unwrap();
        assert_eq!(store.get("AAPL").unwrap(), None);
    }

    #[test]
    fn set_is_upsert() {
        let store = SqliteCheckpointStore::open_in_memory().unwrap();
        store.set("AAPL", 100).unwrap();
        store.set("AAPL", 250).unwrap();
        store.set("MSFT", 50).unwrap();
        assert_eq!(store.get("AAPL").unwrap(), Some(250));
        assert_eq!(
            store.all().unwrap(),
            vec![("AAPL".to_string(), 250), ("MSFT".to_string(), 50)]
        );
    }

    #[test]
    fn reset_reports_existence() {
        let store = SqliteCheckpointStore::open_in_memory().unwrap();
        store.set("AAPL", 1).unwrap();
        assert!(store.reset("AAPL").unwrap());
        assert!(!store.reset("AAPL").unwrap());
        assert_eq!(store.get("AAPL").unwrap(), None);
    }
}
