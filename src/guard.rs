//! Single-instance guard for overlapping scheduled invocations.
//!
//! The lock file carries a JSON record with the owning run's pid and start
//! time. Acquisition takes an OS-level exclusive lock first, so a live run
//! always wins and reclaim decisions are race-free; a record left behind by
//! a crashed run keeps blocking until it is older than the configured
//! maximum run duration, then gets reclaimed with a warning.

use anyhow::{Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};
use tracing::warn;

#[derive(Debug, Serialize, Deserialize)]
struct LockRecord {
    pid: u32,
    started_at_utc: String,
}

/// Held for the duration of one run; releases and removes the lock on drop.
#[derive(Debug)]
pub struct RunGuard {
    file: File,
    path: PathBuf,
}

impl RunGuard {
    /// Returns `None` when another run owns the lock (live process, or a
    /// crash younger than `max_run`). The caller must exit without doing
    /// any further work in that case.
    pub fn try_acquire(path: &Path, max_run: Duration) -> Result<Option<Self>> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating lock directory '{}'", parent.display()))?;
        }

        // Never unlink the file to "clear" a lock: a second process could
        // recreate it and both would hold exclusive locks on different inodes.
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("opening lock file '{}'", path.display()))?;

        if file.try_lock_exclusive().is_err() {
            return Ok(None);
        }

        // The OS lock is ours, so any record on disk belongs to a run that
        // is no longer alive.
        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .with_context(|| format!("reading lock file '{}'", path.display()))?;
        if !contents.trim().is_empty() {
            match serde_json::from_str::<LockRecord>(&contents) {
                Ok(record) if !is_stale(&record, max_run) => return Ok(None),
                Ok(record) => warn!(
                    lock = %path.display(),
                    started_at = %record.started_at_utc,
                    pid = record.pid,
                    "reclaiming stale lock from crashed run"
                ),
                Err(_) => warn!(
                    lock = %path.display(),
                    "reclaiming lock with unreadable record"
                ),
            }
        }

        let record = LockRecord {
            pid: std::process::id(),
            started_at_utc: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .context("formatting lock timestamp")?,
        };
        file.set_len(0)
            .with_context(|| format!("truncating lock file '{}'", path.display()))?;
        file.seek(SeekFrom::Start(0))?;
        let bytes = serde_json::to_vec(&record).context("serializing lock record")?;
        file.write_all(&bytes)
            .with_context(|| format!("writing lock file '{}'", path.display()))?;
        file.flush()?;

        Ok(Some(Self {
            file,
            path: path.to_path_buf(),
        }))
    }
}

fn is_stale(record: &LockRecord, max_run: Duration) -> bool {
    match OffsetDateTime::parse(&record.started_at_utc, &Rfc3339) {
        Ok(started) => OffsetDateTime::now_utc() - started >= max_run,
        // a record we cannot date cannot belong to a live run (we hold the lock)
        Err(_) => true,
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_record(path: &Path, started: OffsetDateTime) {
        let record = LockRecord {
            pid: 12345,
            started_at_utc: started.format(&Rfc3339).unwrap(),
        };
        fs::write(path, serde_json::to_vec(&record).unwrap()).unwrap();
    }

    #[test]
    fn acquire_creates_and_removes_lock() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("run.lock");

        {
            let guard = RunGuard::try_acquire(&path, Duration::hours(12)).unwrap();
            assert!(guard.is_some());
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn second_acquire_is_refused_while_held() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("run.lock");

        let _guard = RunGuard::try_acquire(&path, Duration::hours(12))
            .unwrap()
            .unwrap();
        let second = RunGuard::try_acquire(&path, Duration::hours(12)).unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn fresh_record_from_dead_run_blocks() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("run.lock");
        write_record(&path, OffsetDateTime::now_utc() - Duration::minutes(5));

        let guard = RunGuard::try_acquire(&path, Duration::hours(12)).unwrap();
        assert!(guard.is_none());
        assert!(path.exists());
    }

    #[test]
    fn stale_record_is_reclaimed() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("run.lock");
        write_record(&path, OffsetDateTime::now_utc() - Duration::hours(20));

        let guard = RunGuard::try_acquire(&path, Duration::hours(12)).unwrap();
        assert!(guard.is_some());
    }
}
