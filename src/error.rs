use std::path::PathBuf;
use thiserror::Error;

/// Failures surfaced to the operator while processing one (release, target) pair.
///
/// Everything else (ledger I/O, lock handling) travels as plain `anyhow`
/// errors and aborts the run instead of a single pair.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("release catalog unavailable: {0}")]
    CatalogUnavailable(String),

    #[error("malformed version '{0}': expected at least a major.minor pair")]
    MalformedVersion(String),

    #[error("missing kernel config for target '{target}' series {series} (expected {})", .path.display())]
    MissingConfig {
        target: String,
        series: String,
        path: PathBuf,
    },

    #[error("kernel package build failed ({status}):\n{detail}")]
    CompileError { status: String, detail: String },

    #[error("repository publish failed: {0}")]
    PublishError(String),
}
