//! Source acquisition stage.

use crate::catalog::Release;
use crate::toolchain::SourceFetcher;
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

/// Download (or reuse) the release tarball and unpack it into the
/// per-version build directory. A leftover build tree from an interrupted
/// run is discarded first; the tarball itself is kept so the remaining
/// targets of the same version skip the transfer.
pub(crate) fn fetch_and_extract(
    fetcher: &dyn SourceFetcher,
    scratch_root: &Path,
    release: &Release,
    build_dir: &Path,
) -> Result<()> {
    fs::create_dir_all(scratch_root)
        .with_context(|| format!("creating scratch root '{}'", scratch_root.display()))?;

    let tarball = scratch_root.join(format!("linux-{}.tar.xz", release.version));
    fetcher
        .fetch(&release.source, &tarball)
        .with_context(|| format!("fetching source for {}", release.version))?;

    if build_dir.exists() {
        fs::remove_dir_all(build_dir).with_context(|| {
            format!("removing stale build directory '{}'", build_dir.display())
        })?;
    }

    fetcher
        .unpack(&tarball, scratch_root)
        .with_context(|| format!("extracting source for {}", release.version))?;

    if !build_dir.is_dir() {
        bail!(
            "extraction of '{}' did not produce '{}'",
            tarball.display(),
            build_dir.display()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolchain::fakes::FakeFetcher;

    fn release() -> Release {
        Release {
            version: "6.9.2".to_string(),
            source: "https://cdn/linux-6.9.2.tar.xz".to_string(),
        }
    }

    #[test]
    fn produces_build_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let scratch = tmp.path().join("scratch");
        let build_dir = scratch.join("linux-6.9.2");
        let fetcher = FakeFetcher::new();

        fetch_and_extract(&fetcher, &scratch, &release(), &build_dir).unwrap();
        assert!(build_dir.is_dir());
        assert_eq!(fetcher.fetch_count(), 1);
    }

    #[test]
    fn discards_stale_build_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let scratch = tmp.path().join("scratch");
        let build_dir = scratch.join("linux-6.9.2");
        fs::create_dir_all(&build_dir).unwrap();
        fs::write(build_dir.join("half-written.o"), b"junk").unwrap();

        let fetcher = FakeFetcher::new();
        fetch_and_extract(&fetcher, &scratch, &release(), &build_dir).unwrap();
        assert!(!build_dir.join("half-written.o").exists());
    }
}
