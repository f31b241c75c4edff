//! Artifact collection, staging, and scratch cleanup.
//!
//! The packaging target drops its products next to the source tree rather
//! than reporting them, so collection is a filesystem scan keyed on the
//! `{version}-{target}` fragment the localversion stamp puts into every
//! package name.

use crate::fsutil::{move_file, sha256_file};
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Packages produced for this version/target, sorted for stable ordering.
pub(crate) fn collect(
    scratch_root: &Path,
    version: &str,
    target: &str,
) -> Result<Vec<PathBuf>> {
    let marker = format!("{version}-{target}");
    let mut packages = Vec::new();
    for entry in fs::read_dir(scratch_root)
        .with_context(|| format!("reading scratch root '{}'", scratch_root.display()))?
    {
        let entry = entry
            .with_context(|| format!("iterating scratch root '{}'", scratch_root.display()))?;
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if name.ends_with(".deb") && name.contains(&marker) {
            packages.push(entry.path());
        }
    }
    if packages.is_empty() {
        bail!("no packages matching '*{marker}*.deb' found in '{}'", scratch_root.display());
    }
    packages.sort();
    Ok(packages)
}

/// Move collected packages into the version's output directory and persist
/// the effective configuration (plus its digest) for reproducibility.
pub(crate) fn stage(
    packages: &[PathBuf],
    output_dir: &Path,
    build_dir: &Path,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("creating output directory '{}'", output_dir.display()))?;

    let mut staged = Vec::with_capacity(packages.len());
    for package in packages {
        let Some(name) = package.file_name() else {
            bail!("package path '{}' has no file name", package.display());
        };
        let dest = output_dir.join(name);
        move_file(package, &dest)?;
        info!(package = %dest.display(), "staged");
        staged.push(dest);
    }

    let effective_config = build_dir.join(".config");
    let saved_config = output_dir.join("config");
    fs::copy(&effective_config, &saved_config).with_context(|| {
        format!(
            "saving effective config '{}' to '{}'",
            effective_config.display(),
            saved_config.display()
        )
    })?;
    let digest = sha256_file(&saved_config)?;
    fs::write(output_dir.join("config.sha256"), format!("{digest}\n"))
        .with_context(|| format!("writing config digest under '{}'", output_dir.display()))?;

    Ok(staged)
}

/// Remove the per-version build tree and stray files carrying the
/// version/target prefix. Runs on success and failure alike.
pub(crate) fn clean_scratch(
    scratch_root: &Path,
    build_dir: &Path,
    version: &str,
    target: &str,
) -> Result<()> {
    if build_dir.exists() {
        fs::remove_dir_all(build_dir).with_context(|| {
            format!("removing build directory '{}'", build_dir.display())
        })?;
    }

    if !scratch_root.is_dir() {
        return Ok(());
    }
    let prefix = format!("linux-{version}-{target}");
    for entry in fs::read_dir(scratch_root)
        .with_context(|| format!("reading scratch root '{}'", scratch_root.display()))?
    {
        let entry = entry?;
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if name.starts_with(&prefix) {
            fs::remove_file(entry.path())
                .with_context(|| format!("removing stray file '{}'", entry.path().display()))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_matches_only_this_pair() {
        let tmp = tempfile::tempdir().unwrap();
        let scratch = tmp.path();
        for name in [
            "linux-image-6.9.2-beast_6.9.2-1_amd64.deb",
            "linux-headers-6.9.2-beast_6.9.2-1_amd64.deb",
            "linux-image-6.9.2-saddle_6.9.2-1_amd64.deb",
            "linux-libc-dev_6.9.2-1_amd64.deb",
            "linux-6.9.2.tar.xz",
        ] {
            fs::write(scratch.join(name), b"x").unwrap();
        }

        let packages = collect(scratch, "6.9.2", "beast").unwrap();
        let names: Vec<_> = packages
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "linux-headers-6.9.2-beast_6.9.2-1_amd64.deb",
                "linux-image-6.9.2-beast_6.9.2-1_amd64.deb",
            ]
        );
    }

    #[test]
    fn collect_fails_when_nothing_was_produced() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(collect(tmp.path(), "6.9.2", "beast").is_err());
    }

    #[test]
    fn clean_scratch_removes_tree_and_strays() {
        let tmp = tempfile::tempdir().unwrap();
        let scratch = tmp.path();
        let build_dir = scratch.join("linux-6.9.2");
        fs::create_dir_all(build_dir.join("arch")).unwrap();
        fs::write(scratch.join("linux-6.9.2-beast_6.9.2-1_amd64.changes"), b"x").unwrap();
        fs::write(scratch.join("linux-6.9.2.tar.xz"), b"x").unwrap();

        clean_scratch(scratch, &build_dir, "6.9.2", "beast").unwrap();

        assert!(!build_dir.exists());
        assert!(!scratch
            .join("linux-6.9.2-beast_6.9.2-1_amd64.changes")
            .exists());
        // the shared tarball survives for other targets
        assert!(scratch.join("linux-6.9.2.tar.xz").exists());
    }
}
