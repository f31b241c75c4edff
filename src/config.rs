//! Builder configuration.
//!
//! Every path, the target set, and the retry/lock policy live in one
//! struct handed to the orchestrator at construction. The process takes no
//! arguments; configuration is read from `/etc/kernel-builder.toml`, then
//! `~/.config/kernel-builder/config.toml`, falling back to the defaults
//! below when neither exists.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BuilderConfig {
    /// Upstream release feed (JSON `releases` array).
    pub catalog_url: String,
    /// Distribution profiles every release is built against.
    pub targets: Vec<String>,
    /// Scratch root holding source tarballs and per-version build trees.
    pub build_dir: PathBuf,
    /// Root of the per-version output directories with finished packages.
    pub packages_dir: PathBuf,
    /// reprepro repository root.
    pub repo_dir: PathBuf,
    /// Kernel configs, the build ledger, and metapackage scratch space.
    pub metadata_dir: PathBuf,
    /// Single-instance lock file.
    pub lock_file: PathBuf,
    /// Parallelism hint passed to the package build.
    pub build_jobs: usize,
    /// Repository channel packages are ingested into.
    pub channel: String,
    /// Whether to synthesize dependency-only metapackages after publishing.
    pub metapackages: bool,
    /// Attempts per (version, target) before the pair is parked for an operator.
    pub retry_budget: u32,
    /// Base delay before a failed pair becomes eligible again; doubles per failure.
    pub retry_backoff_minutes: u64,
    /// Lock records older than this belong to a crashed run and may be reclaimed.
    pub max_run_minutes: u64,
    /// Base URL under which published versions are reachable.
    pub download_base: String,
    /// Maintainer field stamped into generated metapackages.
    pub maintainer: String,
    pub mail: MailConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct MailConfig {
    pub smtp_host: String,
    pub from: String,
    pub to: String,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            catalog_url: "https://www.kernel.org/releases.json".to_string(),
            targets: vec![
                "beast".to_string(),
                "mjolnir".to_string(),
                "saddle".to_string(),
            ],
            build_dir: PathBuf::from("/usr/src"),
            packages_dir: PathBuf::from("/var/www"),
            repo_dir: PathBuf::from("/var/www/debian"),
            metadata_dir: PathBuf::from("/var/lib/kernel-builder"),
            lock_file: PathBuf::from("/tmp/kernel-builder.lock"),
            build_jobs: 8,
            channel: "testing".to_string(),
            metapackages: true,
            retry_budget: 3,
            retry_backoff_minutes: 60,
            max_run_minutes: 720,
            download_base: "http://localhost/".to_string(),
            maintainer: "Kernel Builder <builder@localhost>".to_string(),
            mail: MailConfig::default(),
        }
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            smtp_host: "localhost".to_string(),
            from: "builder@localhost".to_string(),
            to: "root@localhost".to_string(),
        }
    }
}

impl BuilderConfig {
    /// Load configuration from the first candidate file that exists, or the
    /// built-in defaults when none does.
    pub fn load() -> Result<Self> {
        for path in Self::candidate_paths() {
            if path.is_file() {
                return Self::from_file(&path);
            }
        }
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config file '{}'", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("parsing config file '{}'", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/kernel-builder.toml")];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("kernel-builder/config.toml"));
        }
        paths
    }

    fn validate(&self) -> Result<()> {
        if self.targets.is_empty() {
            bail!("config declares no build targets");
        }
        if self.build_jobs == 0 {
            bail!("build_jobs must be at least 1");
        }
        if self.retry_budget == 0 {
            bail!("retry_budget must be at least 1");
        }
        Ok(())
    }

    /// Kernel config file governing builds of `series` for `target`.
    pub fn config_path(&self, target: &str, series: &str) -> PathBuf {
        self.metadata_dir.join(format!("config.{target}.{series}"))
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.metadata_dir.join("ledger.json")
    }

    /// Output directory holding the finished packages of one version.
    pub fn version_output_dir(&self, version: &str) -> PathBuf {
        self.packages_dir.join(version)
    }

    /// URL operators can fetch a published version from.
    pub fn download_url(&self, version: &str) -> String {
        format!("{}/{version}", self.download_base.trim_end_matches('/'))
    }
}
