//! Configuration seeding and the compile stage.

use crate::toolchain::{Compiler, Configurer};
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Install the series config as the active `.config`, accept defaults for
/// options the config predates, and stamp the target into the localversion
/// so package names are disambiguated per target.
pub(crate) fn seed_config(
    configurer: &dyn Configurer,
    build_dir: &Path,
    config_path: &Path,
    target: &str,
) -> Result<()> {
    let dest = build_dir.join(".config");
    fs::copy(config_path, &dest).with_context(|| {
        format!(
            "copying '{}' to '{}'",
            config_path.display(),
            dest.display()
        )
    })?;
    configurer.normalize_config(build_dir)?;
    configurer.set_local_version(build_dir, &local_version(target))
}

pub(crate) fn compile(
    compiler: &dyn Compiler,
    build_dir: &Path,
    target: &str,
    jobs: usize,
) -> Result<()> {
    compiler.build_packages(build_dir, &local_version(target), jobs)
}

fn local_version(target: &str) -> String {
    format!("-{target}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolchain::fakes::FakeConfigurer;

    #[test]
    fn seeds_config_then_normalizes_then_stamps() {
        let tmp = tempfile::tempdir().unwrap();
        let build_dir = tmp.path().join("linux-6.9.2");
        fs::create_dir_all(&build_dir).unwrap();
        let series_config = tmp.path().join("config.beast.6.9");
        fs::write(&series_config, "CONFIG_SMP=y\n").unwrap();

        let configurer = FakeConfigurer::default();
        seed_config(&configurer, &build_dir, &series_config, "beast").unwrap();

        assert_eq!(
            fs::read_to_string(build_dir.join(".config")).unwrap(),
            "CONFIG_SMP=y\n"
        );
        assert_eq!(configurer.normalize_count(), 1);
        assert_eq!(configurer.stamped_suffix(), Some("-beast".to_string()));
    }
}
