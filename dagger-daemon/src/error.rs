use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the reconcile loop and the gcloud control plane.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config error: {0}")]
    Config(#[from] dagger_core::ConfigError),

    #[error("sync error: {0}")]
    Sync(#[from] dagger_sync::SyncError),

    #[error("signal handler failed: {0}")]
    Signal(String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
