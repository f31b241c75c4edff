//! Build ledger: which (version, target) pairs were attempted, failed, or built.
//!
//! One JSON document under the metadata root, rewritten atomically after
//! every mutation. A pair's record distinguishes an in-flight attempt (a
//! crashed run leaves it behind) from a failed build that may be retried
//! within its budget once the backoff expires, and from a completed build
//! that is never reprocessed.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};

const MAX_RECORDED_ERROR_LEN: usize = 4000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PairStatus {
    /// An attempt is underway, or a previous run died before recording its outcome.
    Attempted,
    Failed {
        last_error: String,
        retry_after_utc: String,
    },
    Built,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairRecord {
    #[serde(flatten)]
    pub status: PairStatus,
    /// Attempts started so far, including the current one.
    pub attempts: u32,
    pub attempted_at_utc: String,
    pub last_attempt_utc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub built_at_utc: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    #[serde(default = "format_version")]
    format_version: u32,
    #[serde(default)]
    records: BTreeMap<String, PairRecord>,
}

fn format_version() -> u32 {
    1
}

#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    records: BTreeMap<String, PairRecord>,
}

impl Ledger {
    pub fn open(path: &Path) -> Result<Self> {
        let records = if path.is_file() {
            let bytes = fs::read(path)
                .with_context(|| format!("reading ledger '{}'", path.display()))?;
            let file: LedgerFile = serde_json::from_slice(&bytes)
                .with_context(|| format!("parsing ledger '{}'", path.display()))?;
            file.records
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            records,
        })
    }

    fn key(version: &str, target: &str) -> String {
        format!("{version}.{target}")
    }

    pub fn has_attempted(&self, version: &str, target: &str) -> bool {
        self.records.contains_key(&Self::key(version, target))
    }

    pub fn has_built(&self, version: &str, target: &str) -> bool {
        matches!(
            self.records.get(&Self::key(version, target)),
            Some(PairRecord {
                status: PairStatus::Built,
                ..
            })
        )
    }

    /// Whether the orchestrator should start (another) attempt for this pair.
    ///
    /// Built pairs and in-flight attempts are never eligible. Failed pairs
    /// are eligible while attempts remain in the budget and the backoff
    /// stamped at failure time has passed.
    pub fn eligible(
        &self,
        version: &str,
        target: &str,
        retry_budget: u32,
        now: OffsetDateTime,
    ) -> bool {
        match self.records.get(&Self::key(version, target)) {
            None => true,
            Some(record) => match &record.status {
                PairStatus::Built | PairStatus::Attempted => false,
                PairStatus::Failed {
                    retry_after_utc, ..
                } => {
                    if record.attempts >= retry_budget {
                        return false;
                    }
                    match OffsetDateTime::parse(retry_after_utc, &Rfc3339) {
                        Ok(retry_after) => now >= retry_after,
                        // unreadable timestamp: park the pair for an operator
                        Err(_) => false,
                    }
                }
            },
        }
    }

    /// Record that an attempt is starting. Idempotent: a pair already
    /// attempted or built is left untouched.
    pub fn record_attempt(&mut self, version: &str, target: &str) -> Result<()> {
        let now = now_utc_string()?;
        match self.records.get_mut(&Self::key(version, target)) {
            None => {
                self.records.insert(
                    Self::key(version, target),
                    PairRecord {
                        status: PairStatus::Attempted,
                        attempts: 1,
                        attempted_at_utc: now.clone(),
                        last_attempt_utc: now,
                        built_at_utc: None,
                    },
                );
            }
            Some(record) => match record.status {
                PairStatus::Attempted | PairStatus::Built => return Ok(()),
                PairStatus::Failed { .. } => {
                    record.status = PairStatus::Attempted;
                    record.attempts += 1;
                    record.last_attempt_utc = now;
                }
            },
        }
        self.save()
    }

    /// Record a failed attempt with its backoff window.
    pub fn record_failure(
        &mut self,
        version: &str,
        target: &str,
        error: &str,
        backoff_base: Duration,
    ) -> Result<()> {
        let Some(record) = self.records.get_mut(&Self::key(version, target)) else {
            bail!("failure recorded for pair {version}/{target} without a prior attempt");
        };
        let exponent = record.attempts.saturating_sub(1).min(16);
        let retry_after = OffsetDateTime::now_utc() + backoff_base * (1i32 << exponent);
        let mut last_error = error.to_string();
        last_error.truncate(MAX_RECORDED_ERROR_LEN);
        record.status = PairStatus::Failed {
            last_error,
            retry_after_utc: retry_after
                .format(&Rfc3339)
                .context("formatting retry timestamp")?,
        };
        self.save()
    }

    /// Record a completed build. Idempotent.
    pub fn record_built(&mut self, version: &str, target: &str) -> Result<()> {
        let Some(record) = self.records.get_mut(&Self::key(version, target)) else {
            bail!("build recorded for pair {version}/{target} without a prior attempt");
        };
        if record.status == PairStatus::Built {
            return Ok(());
        }
        record.status = PairStatus::Built;
        record.built_at_utc = Some(now_utc_string()?);
        self.save()
    }

    fn save(&self) -> Result<()> {
        let file = LedgerFile {
            format_version: format_version(),
            records: self.records.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&file).context("serializing ledger")?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating directory '{}'", parent.display()))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, bytes)
            .with_context(|| format!("writing ledger tmp '{}'", tmp.display()))?;
        fs::rename(&tmp, &self.path).with_context(|| {
            format!(
                "renaming '{}' to '{}'",
                tmp.display(),
                self.path.display()
            )
        })?;
        Ok(())
    }
}

fn now_utc_string() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .context("formatting current time")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_in(dir: &Path) -> Ledger {
        Ledger::open(&dir.join("ledger.json")).unwrap()
    }

    #[test]
    fn record_attempt_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ledger = ledger_in(tmp.path());

        ledger.record_attempt("6.9.2", "beast").unwrap();
        ledger.record_attempt("6.9.2", "beast").unwrap();

        assert!(ledger.has_attempted("6.9.2", "beast"));
        assert_eq!(ledger.records.len(), 1);
        assert_eq!(ledger.records.values().next().unwrap().attempts, 1);
    }

    #[test]
    fn built_implies_attempted() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ledger = ledger_in(tmp.path());

        ledger.record_attempt("6.9.2", "beast").unwrap();
        ledger.record_built("6.9.2", "beast").unwrap();

        assert!(ledger.has_built("6.9.2", "beast"));
        assert!(ledger.has_attempted("6.9.2", "beast"));
    }

    #[test]
    fn built_pairs_are_not_eligible() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ledger = ledger_in(tmp.path());
        let now = OffsetDateTime::now_utc();

        assert!(ledger.eligible("6.9.2", "beast", 3, now));
        ledger.record_attempt("6.9.2", "beast").unwrap();
        assert!(!ledger.eligible("6.9.2", "beast", 3, now));
        ledger.record_built("6.9.2", "beast").unwrap();
        assert!(!ledger.eligible("6.9.2", "beast", 3, now));
    }

    #[test]
    fn failed_pairs_retry_after_backoff_within_budget() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ledger = ledger_in(tmp.path());
        let now = OffsetDateTime::now_utc();

        ledger.record_attempt("6.9.2", "beast").unwrap();
        ledger
            .record_failure("6.9.2", "beast", "mirror unreachable", Duration::minutes(60))
            .unwrap();

        // backoff has not expired yet
        assert!(!ledger.eligible("6.9.2", "beast", 3, now));
        // ...but it has an hour and a bit from now
        assert!(ledger.eligible("6.9.2", "beast", 3, now + Duration::minutes(61)));
        // ...unless the budget is exhausted
        assert!(!ledger.eligible("6.9.2", "beast", 1, now + Duration::minutes(61)));
    }

    #[test]
    fn attempts_accumulate_across_retries() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ledger = ledger_in(tmp.path());

        ledger.record_attempt("6.9.2", "beast").unwrap();
        ledger
            .record_failure("6.9.2", "beast", "boom", Duration::minutes(1))
            .unwrap();
        ledger.record_attempt("6.9.2", "beast").unwrap();

        assert_eq!(ledger.records.values().next().unwrap().attempts, 2);
    }

    #[test]
    fn state_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let mut ledger = ledger_in(tmp.path());
            ledger.record_attempt("6.9.2", "beast").unwrap();
            ledger.record_built("6.9.2", "beast").unwrap();
            ledger.record_attempt("6.8", "saddle").unwrap();
        }

        let reopened = ledger_in(tmp.path());
        assert!(reopened.has_built("6.9.2", "beast"));
        assert!(reopened.has_attempted("6.8", "saddle"));
        assert!(!reopened.has_built("6.8", "saddle"));
    }

    #[test]
    fn record_built_requires_prior_attempt() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ledger = ledger_in(tmp.path());
        assert!(ledger.record_built("6.9.2", "beast").is_err());
    }
}
