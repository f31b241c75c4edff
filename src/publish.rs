//! Repository publishing.
//!
//! Ingests freshly built kernel packages into the repository channel, then
//! synthesizes one dependency-only metapackage per package class so that
//! installing `linux-image-{target}` always pulls the newest build for that
//! target.

use crate::config::BuilderConfig;
use crate::error::BuildError;
use crate::fsutil::move_file;
use crate::toolchain::{Packager, RepositoryTool};
use crate::version::normalized_version;
use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Package classes that get a version-pinned metapackage.
const METAPACKAGE_CLASSES: &[&str] = &["image", "headers"];

pub struct Publisher<'a> {
    config: &'a BuilderConfig,
    repo: &'a dyn RepositoryTool,
    packager: &'a dyn Packager,
}

impl<'a> Publisher<'a> {
    pub fn new(
        config: &'a BuilderConfig,
        repo: &'a dyn RepositoryTool,
        packager: &'a dyn Packager,
    ) -> Self {
        Self {
            config,
            repo,
            packager,
        }
    }

    /// Ingest the built kernel packages into the repository channel.
    ///
    /// Artifacts normally arrive already staged in the version's output
    /// directory; anything still elsewhere is moved in first.
    pub fn publish_packages(
        &self,
        version: &str,
        target: &str,
        packages: &[PathBuf],
    ) -> Result<()> {
        let output_dir = self.config.version_output_dir(version);
        fs::create_dir_all(&output_dir)
            .map_err(|e| publish_error(format!("creating '{}'", output_dir.display()), e))?;

        for package in packages {
            let Some(name) = package.file_name() else {
                return Err(BuildError::PublishError(format!(
                    "package path '{}' has no file name",
                    package.display()
                ))
                .into());
            };
            let dest = output_dir.join(name);
            if !dest.exists() {
                move_file(package, &dest)
                    .map_err(|e| BuildError::PublishError(format!("{e:#}")))?;
            }
            self.repo
                .ingest(&self.config.channel, &dest)
                .map_err(|e| BuildError::PublishError(format!("{e:#}")))?;
            info!(package = %dest.display(), channel = %self.config.channel, target, "ingested");
        }
        Ok(())
    }

    /// Build, ingest, and export the per-class metapackages for `target`.
    pub fn publish_metapackages(&self, version: &str, target: &str) -> Result<()> {
        let pinned = normalized_version(version);
        let output_dir = self.config.version_output_dir(version);

        for class in METAPACKAGE_CLASSES {
            let control_dir = self
                .config
                .metadata_dir
                .join(format!("linux-{class}-{target}"));
            fs::create_dir_all(&control_dir)
                .map_err(|e| publish_error(format!("creating '{}'", control_dir.display()), e))?;
            fs::write(
                control_dir.join("ns-control"),
                render_control(self.config, class, target, &pinned),
            )
            .map_err(|e| publish_error("writing metapackage control file".to_string(), e))?;

            self.packager
                .build_metapackage(&control_dir, "ns-control")
                .map_err(|e| BuildError::PublishError(format!("{e:#}")))?;

            for deb in debs_in(&control_dir)? {
                let Some(name) = deb.file_name() else {
                    continue;
                };
                let dest = output_dir.join(name);
                move_file(&deb, &dest).map_err(|e| BuildError::PublishError(format!("{e:#}")))?;
                self.repo
                    .ingest(&self.config.channel, &dest)
                    .map_err(|e| BuildError::PublishError(format!("{e:#}")))?;
            }
        }

        self.repo
            .export(&self.config.channel)
            .map_err(|e| BuildError::PublishError(format!("{e:#}")))?;
        info!(version, target, channel = %self.config.channel, "metapackages published");
        Ok(())
    }
}

fn debs_in(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut debs = Vec::new();
    let entries = fs::read_dir(dir)
        .map_err(|e| publish_error(format!("reading '{}'", dir.display()), e))?;
    for entry in entries {
        let entry = entry.map_err(|e| publish_error(format!("reading '{}'", dir.display()), e))?;
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) == Some("deb") && path.is_file() {
            debs.push(path);
        }
    }
    debs.sort();
    Ok(debs)
}

fn publish_error(what: String, e: std::io::Error) -> anyhow::Error {
    BuildError::PublishError(format!("{what}: {e}")).into()
}

/// Dependency-only control file pinning the metapackage to the newest build.
fn render_control(config: &BuilderConfig, class: &str, target: &str, pinned: &str) -> String {
    format!(
        "Section: misc\n\
         Priority: optional\n\
         Homepage: {homepage}\n\
         Standards-Version: 3.9.2\n\
         \n\
         Package: linux-{class}-{target}\n\
         Version: {pinned}\n\
         Maintainer: {maintainer}\n\
         Depends: linux-{class}-{pinned}-{target}\n\
         Architecture: amd64\n\
         Description: Metapackage for {target}'s autogenerated kernels\n\
         \x20This package depends on the most recent kernel automatically built\n\
         \x20for the {target} profile.\n",
        homepage = config.download_base,
        maintainer = config.maintainer,
    )
}
