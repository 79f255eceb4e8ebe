//! Error types for dagger-sync.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use dagger_core::{ConfigError, ControlError, DesiredSetError, StoreError};
use dagger_resolver::ResolveError;

use crate::apply::Step;

/// A drift check that could not decide. Callers treat the DAG as drifted.
#[derive(Debug, Error)]
pub enum CompareError {
    #[error("couldn't hash local file {path}: {source}")]
    Local {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("couldn't read remote digest for {key}: {source}")]
    Remote {
        key: String,
        #[source]
        source: StoreError,
    },
}

/// Planning failures. Any of these aborts the run before anything is applied.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("couldn't snapshot remote tree: {0}")]
    Snapshot(#[source] StoreError),

    #[error(transparent)]
    Resolution(#[from] ResolveError),
}

/// Why one DAG's stop or start did not complete.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("malformed path '{path}'")]
    MalformedPath { path: String },

    #[error("{step} failed: {source}")]
    Control {
        step: Step,
        #[source]
        source: ControlError,
    },

    #[error("{step} failed: {source}")]
    Store {
        step: Step,
        #[source]
        source: StoreError,
    },

    #[error("{step} timed out after {after:?}")]
    Timeout { step: Step, after: Duration },

    #[error("{step} gave up after {attempts} attempt(s): {last}")]
    RetriesExhausted {
        step: Step,
        attempts: u32,
        last: String,
    },

    #[error("cancelled")]
    Cancelled,

    #[error("worker panicked: {0}")]
    Panicked(String),
}

/// Errors from a full reconcile run.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Desired(#[from] DesiredSetError),

    #[error("couldn't list running DAGs: {0}")]
    ListRunning(#[source] ControlError),

    #[error("couldn't determine DAG prefix: {0}")]
    Describe(#[source] ControlError),

    #[error("plan failed: {0}")]
    Plan(#[from] PlanError),

    #[error("couldn't upload {key}: {source}")]
    Upload {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
