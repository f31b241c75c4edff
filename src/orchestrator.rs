//! Run orchestration.
//!
//! One run: acquire the single-instance guard, fetch the catalog, then walk
//! every configured target across every eligible release, driving each pair
//! through attempt -> build -> publish -> record, notifying the operator of
//! the outcome. An error in one pair never aborts the run; a catalog
//! failure does, with the guard still released on the way out.

use crate::catalog::ReleaseSource;
use crate::config::BuilderConfig;
use crate::guard::RunGuard;
use crate::ledger::Ledger;
use crate::notify::Notifier;
use crate::pipeline::Pipeline;
use crate::publish::Publisher;
use crate::toolchain::{Compiler, Configurer, Packager, RepositoryTool, SourceFetcher};
use anyhow::{Context, Result};
use time::{Duration, OffsetDateTime};
use tracing::{error, info, warn};

#[derive(Debug, Default)]
pub struct RunSummary {
    pub built: usize,
    pub failed: usize,
    /// True when another run held the lock and nothing was done.
    pub skipped: bool,
}

pub struct Orchestrator<'a> {
    config: &'a BuilderConfig,
    catalog: &'a dyn ReleaseSource,
    fetcher: &'a dyn SourceFetcher,
    configurer: &'a dyn Configurer,
    compiler: &'a dyn Compiler,
    packager: &'a dyn Packager,
    repo: &'a dyn RepositoryTool,
    notifier: &'a dyn Notifier,
}

impl<'a> Orchestrator<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &'a BuilderConfig,
        catalog: &'a dyn ReleaseSource,
        fetcher: &'a dyn SourceFetcher,
        configurer: &'a dyn Configurer,
        compiler: &'a dyn Compiler,
        packager: &'a dyn Packager,
        repo: &'a dyn RepositoryTool,
        notifier: &'a dyn Notifier,
    ) -> Self {
        Self {
            config,
            catalog,
            fetcher,
            configurer,
            compiler,
            packager,
            repo,
            notifier,
        }
    }

    pub fn run(&self) -> Result<RunSummary> {
        let max_run = Duration::minutes(self.config.max_run_minutes as i64);
        let Some(_guard) = RunGuard::try_acquire(&self.config.lock_file, max_run)? else {
            info!("another run holds the lock; exiting");
            return Ok(RunSummary {
                skipped: true,
                ..RunSummary::default()
            });
        };
        // from here on the guard is dropped on every exit path

        let mut ledger = Ledger::open(&self.config.ledger_path())?;
        let releases = self
            .catalog
            .fetch()
            .map_err(|e| anyhow::Error::new(e).context("fetching release catalog"))?;
        info!(releases = releases.len(), "catalog fetched");

        let pipeline = Pipeline::new(self.config, self.fetcher, self.configurer, self.compiler);
        let publisher = Publisher::new(self.config, self.repo, self.packager);
        let backoff = Duration::minutes(self.config.retry_backoff_minutes as i64);

        let mut summary = RunSummary::default();
        for target in &self.config.targets {
            for release in &releases {
                let version = release.version.as_str();
                if !ledger.eligible(
                    version,
                    target,
                    self.config.retry_budget,
                    OffsetDateTime::now_utc(),
                ) {
                    continue;
                }

                ledger.record_attempt(version, target)?;
                let outcome = pipeline
                    .run(release, target)
                    .and_then(|packages| publisher.publish_packages(version, target, &packages));
                match outcome {
                    Ok(()) => {
                        info!(version, target, "built and published");
                        self.notifier.notify_success(version, target);
                        ledger.record_built(version, target)?;
                        summary.built += 1;

                        if self.config.metapackages {
                            if let Err(e) = publisher.publish_metapackages(version, target) {
                                // the kernel packages are already in the
                                // repository; report and move on
                                warn!(version, target, "metapackage publish failed: {e:#}");
                                self.notifier.notify_failure(version, target, &e);
                            }
                        }
                    }
                    Err(e) => {
                        error!(version, target, "build failed: {e:#}");
                        self.notifier.notify_failure(version, target, &e);
                        ledger
                            .record_failure(version, target, &format!("{e:#}"), backoff)
                            .with_context(|| {
                                format!("recording failure for {version}/{target}")
                            })?;
                        summary.failed += 1;
                    }
                }
            }
        }

        info!(built = summary.built, failed = summary.failed, "run complete");
        Ok(summary)
    }
}
