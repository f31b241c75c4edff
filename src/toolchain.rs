//! Capability interfaces around the external build toolchain.
//!
//! Every stage of the pipeline reaches the outside world through one of
//! these traits, so the sequencing logic can be exercised with fakes while
//! the host implementations shell out to the real tools.

use crate::error::BuildError;
use anyhow::{bail, Context, Result};
use std::fs::{self, File};
use std::path::Path;
use std::process::{Command, Output};
use std::time::Duration;
use tracing::info;

/// Acquires and unpacks release source archives.
pub trait SourceFetcher {
    /// Download `url` to `dest`, skipping the transfer when `dest` already
    /// exists from an earlier run.
    fn fetch(&self, url: &str, dest: &Path) -> Result<()>;

    /// Unpack `archive` into `dest_dir`.
    fn unpack(&self, archive: &Path, dest_dir: &Path) -> Result<()>;
}

/// Normalizes and stamps the kernel configuration in a build tree.
pub trait Configurer {
    /// Accept defaults for any config option missing from `.config`.
    fn normalize_config(&self, build_dir: &Path) -> Result<()>;

    /// Stamp `suffix` into the localversion field so package names carry it.
    fn set_local_version(&self, build_dir: &Path, suffix: &str) -> Result<()>;
}

/// Compiles the kernel and wraps it into installable packages.
pub trait Compiler {
    fn build_packages(&self, build_dir: &Path, local_version: &str, jobs: usize) -> Result<()>;
}

/// Builds dependency-only metapackages from a control file.
pub trait Packager {
    fn build_metapackage(&self, control_dir: &Path, control_file: &str) -> Result<()>;
}

/// Manages the distribution repository.
pub trait RepositoryTool {
    fn ingest(&self, channel: &str, package: &Path) -> Result<()>;
    fn export(&self, channel: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Host implementations
// ---------------------------------------------------------------------------

/// Downloads over HTTP; no overall timeout, kernel tarballs are large.
pub struct HttpFetcher;

impl SourceFetcher for HttpFetcher {
    fn fetch(&self, url: &str, dest: &Path) -> Result<()> {
        if dest.exists() {
            info!(dest = %dest.display(), "source tarball already present, skipping download");
            return Ok(());
        }
        let http = reqwest::blocking::Client::builder()
            .timeout(None::<Duration>)
            .build()
            .context("building download client")?;
        let mut response = http
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("downloading '{url}'"))?;

        let tmp = dest.with_extension("part");
        let mut out = File::create(&tmp)
            .with_context(|| format!("creating '{}'", tmp.display()))?;
        response
            .copy_to(&mut out)
            .with_context(|| format!("writing '{}'", tmp.display()))?;
        fs::rename(&tmp, dest)
            .with_context(|| format!("renaming '{}' to '{}'", tmp.display(), dest.display()))?;
        Ok(())
    }

    fn unpack(&self, archive: &Path, dest_dir: &Path) -> Result<()> {
        run_checked(
            Command::new("tar").arg("xf").arg(archive).arg("-C").arg(dest_dir),
            &format!("unpacking '{}'", archive.display()),
        )
    }
}

/// Drives the kernel's own make targets.
pub struct MakeToolchain;

impl Configurer for MakeToolchain {
    fn normalize_config(&self, build_dir: &Path) -> Result<()> {
        run_checked(
            Command::new("make")
                .arg("olddefconfig")
                .current_dir(build_dir),
            "normalizing kernel config",
        )
    }

    fn set_local_version(&self, build_dir: &Path, suffix: &str) -> Result<()> {
        run_checked(
            Command::new("bash")
                .args(["./scripts/config", "--set-str", "CONFIG_LOCALVERSION", suffix])
                .current_dir(build_dir),
            "stamping localversion",
        )
    }
}

impl Compiler for MakeToolchain {
    fn build_packages(&self, build_dir: &Path, local_version: &str, jobs: usize) -> Result<()> {
        let output = Command::new("make")
            .arg(format!("-j{jobs}"))
            .arg("deb-pkg")
            .arg(format!("CONFIG_LOCALVERSION={local_version}"))
            .current_dir(build_dir)
            .output()
            .context("running make deb-pkg")?;
        if output.status.success() {
            return Ok(());
        }
        let status = match output.status.code() {
            Some(code) => format!("exit status {code}"),
            None => "terminated by signal".to_string(),
        };
        Err(BuildError::CompileError {
            status,
            detail: output_tail(&output, 40),
        }
        .into())
    }
}

/// Wraps `equivs-build`.
pub struct EquivsPackager;

impl Packager for EquivsPackager {
    fn build_metapackage(&self, control_dir: &Path, control_file: &str) -> Result<()> {
        run_checked(
            Command::new("equivs-build")
                .arg(control_file)
                .current_dir(control_dir),
            &format!("building metapackage from '{control_file}'"),
        )
    }
}

/// Wraps `reprepro` against a fixed repository root.
pub struct Reprepro {
    repo_dir: std::path::PathBuf,
}

impl Reprepro {
    pub fn new(repo_dir: impl Into<std::path::PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
        }
    }
}

impl RepositoryTool for Reprepro {
    fn ingest(&self, channel: &str, package: &Path) -> Result<()> {
        run_checked(
            Command::new("reprepro")
                .arg("includedeb")
                .arg(channel)
                .arg(package)
                .current_dir(&self.repo_dir),
            &format!("ingesting '{}' into {channel}", package.display()),
        )
    }

    fn export(&self, channel: &str) -> Result<()> {
        run_checked(
            Command::new("reprepro")
                .arg("export")
                .arg(channel)
                .current_dir(&self.repo_dir),
            &format!("exporting {channel}"),
        )
    }
}

fn run_checked(cmd: &mut Command, what: &str) -> Result<()> {
    let output = cmd.output().with_context(|| format!("{what}: spawning"))?;
    if output.status.success() {
        return Ok(());
    }
    bail!("{what} failed ({}):\n{}", output.status, output_tail(&output, 40))
}

/// Last `lines` of combined stdout/stderr, enough to diagnose without
/// mailing megabytes of build log.
fn output_tail(output: &Output, lines: usize) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let combined: Vec<&str> = stdout
        .lines()
        .chain(stderr.lines())
        .filter(|l| !l.trim().is_empty())
        .collect();
    let start = combined.len().saturating_sub(lines);
    combined[start..].join("\n")
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_checked_reports_failure_output() {
        let err = run_checked(
            Command::new("sh").args(["-c", "echo doomed >&2; exit 3"]),
            "probe",
        )
        .unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("probe failed"));
        assert!(msg.contains("doomed"));
    }

    #[test]
    fn run_checked_passes_on_success() {
        assert!(run_checked(&mut Command::new("true"), "probe").is_ok());
    }

    #[test]
    fn fetch_skips_existing_tarball() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("linux-6.9.2.tar.xz");
        fs::write(&dest, b"cached").unwrap();

        // an unroutable URL proves no transfer is attempted
        HttpFetcher
            .fetch("http://invalid.localdomain/linux.tar.xz", &dest)
            .unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"cached");
    }
}
