use anyhow::{bail, Result};
use kernel_builder::catalog::CatalogClient;
use kernel_builder::config::BuilderConfig;
use kernel_builder::notify::MailNotifier;
use kernel_builder::orchestrator::Orchestrator;
use kernel_builder::preflight;
use kernel_builder::toolchain::{EquivsPackager, HttpFetcher, MakeToolchain, Reprepro};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // runs unattended on a schedule; configuration comes from the config
    // file, never from the command line
    if std::env::args().len() > 1 {
        bail!("kernel-builder takes no arguments");
    }

    let config = BuilderConfig::load()?;
    preflight::check_host_tools()?;

    let catalog = CatalogClient::new(&config.catalog_url);
    let fetcher = HttpFetcher;
    let toolchain = MakeToolchain;
    let packager = EquivsPackager;
    let repo = Reprepro::new(&config.repo_dir);
    let notifier = MailNotifier::new(config.mail.clone(), config.download_base.clone());

    let orchestrator = Orchestrator::new(
        &config, &catalog, &fetcher, &toolchain, &toolchain, &packager, &repo, &notifier,
    );
    let summary = orchestrator.run()?;
    if !summary.skipped {
        info!(
            built = summary.built,
            failed = summary.failed,
            "kernel-builder finished"
        );
    }
    Ok(())
}
