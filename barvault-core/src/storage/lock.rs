//! Interprocess exclusive lock on one job file.
//!
//! The lock lives in `{job}.parquet.lock` beside the data file and is never
//! deleted, so every process always contends on the same inode.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::layout::lock_path;
use super::StorageError;

const POLL_MIN: Duration = Duration::from_millis(5);
const POLL_MAX: Duration = Duration::from_millis(100);

/// Held for the duration of a write; released on drop.
#[derive(Debug)]
pub struct JobLock {
    file: File,
    path: PathBuf,
}

impl JobLock {
    /// Lock the job file at `job_file`, waiting up to `timeout`.
    pub fn acquire(job_file: &Path, timeout: Duration) -> Result<Self, StorageError> {
        let path = lock_path(job_file);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|source| StorageError::io(&path, source))?;

        let started = Instant::now();
        let mut poll = POLL_MIN;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    debug!(lock = %path.display(), "job lock acquired");
                    return Ok(Self { file, path });
                }
                Err(e) if e.kind() == fs2::lock_contended_error().kind() => {}
                Err(source) => return Err(StorageError::io(&path, source)),
            }

            let waited = started.elapsed();
            if waited >= timeout {
                warn!(lock = %path.display(), waited_ms = waited.as_millis() as u64, "job lock timed out");
                return Err(StorageError::LockTimeout { path, waited });
            }
            std::thread::sleep(poll.min(timeout - waited));
            poll = (poll * 2).min(POLL_MAX);
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for JobLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(lock = %self.path.display(), error = %e, "failed to release job lock");
        }
    }
}
