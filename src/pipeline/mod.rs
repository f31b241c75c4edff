//! The per-(release, target) build pipeline.
//!
//! Stages run in a fixed order, each depending on the filesystem state its
//! predecessor left behind:
//!
//! 1. resolve the series config file (fails before anything is created)
//! 2. fetch and unpack the source tarball
//! 3. seed and normalize the kernel configuration
//! 4. compile and package
//! 5. collect the produced packages from the scratch root
//! 6. stage them into the version's output directory
//!
//! Scratch cleanup runs whether or not the stages succeeded, so repeated
//! failing runs cannot grow the scratch root without bound.

mod artifacts;
mod kernel;
mod source;

use crate::catalog::Release;
use crate::config::BuilderConfig;
use crate::error::BuildError;
use crate::toolchain::{Compiler, Configurer, SourceFetcher};
use crate::version::series_of;
use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub struct Pipeline<'a> {
    config: &'a BuilderConfig,
    fetcher: &'a dyn SourceFetcher,
    configurer: &'a dyn Configurer,
    compiler: &'a dyn Compiler,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a BuilderConfig,
        fetcher: &'a dyn SourceFetcher,
        configurer: &'a dyn Configurer,
        compiler: &'a dyn Compiler,
    ) -> Self {
        Self {
            config,
            fetcher,
            configurer,
            compiler,
        }
    }

    /// Build `release` for `target`, returning the staged package paths.
    pub fn run(&self, release: &Release, target: &str) -> Result<Vec<PathBuf>> {
        let series = series_of(&release.version)?;
        let config_path = self.config.config_path(target, &series);
        if !config_path.is_file() {
            return Err(BuildError::MissingConfig {
                target: target.to_string(),
                series,
                path: config_path,
            }
            .into());
        }

        info!(
            version = %release.version,
            target,
            series,
            "building with config {}",
            config_path.display()
        );

        let build_dir = self
            .config
            .build_dir
            .join(format!("linux-{}", release.version));
        let outcome = self.execute(release, target, &config_path, &build_dir);

        if let Err(e) = artifacts::clean_scratch(
            &self.config.build_dir,
            &build_dir,
            &release.version,
            target,
        ) {
            warn!(version = %release.version, target, "scratch cleanup incomplete: {e:#}");
        }

        outcome
    }

    fn execute(
        &self,
        release: &Release,
        target: &str,
        config_path: &Path,
        build_dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        source::fetch_and_extract(self.fetcher, &self.config.build_dir, release, build_dir)?;
        kernel::seed_config(self.configurer, build_dir, config_path, target)?;
        kernel::compile(self.compiler, build_dir, target, self.config.build_jobs)?;
        let packages = artifacts::collect(&self.config.build_dir, &release.version, target)?;
        artifacts::stage(
            &packages,
            &self.config.version_output_dir(&release.version),
            build_dir,
        )
    }
}
