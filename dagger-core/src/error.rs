//! Error types for dagger-core.

use std::path::PathBuf;

use thiserror::Error;

/// Configuration defects. All of these are fatal before a run starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required setting was absent or empty after merging file and flags.
    #[error("missing required setting `{key}`")]
    Missing { key: &'static str },

    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("malformed remote root '{value}'; expected gs://<bucket>/<prefix>")]
    MalformedRemoteRoot { value: String },

    /// `dirs::home_dir()` returned `None` and no explicit config path was given.
    #[error("cannot determine home directory; pass --config explicitly")]
    HomeNotFound,
}

/// Errors reading the desired-set declaration.
#[derive(Debug, Error)]
pub enum DesiredSetError {
    #[error("couldn't read desired DAG list at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Object store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found: {key}")]
    NotFound { key: String },

    #[error("invalid object key '{key}'")]
    InvalidKey { key: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failure reported by a backend that is not tied to a local path.
    #[error("object store error on {key}: {message}")]
    Backend { key: String, message: String },
}

/// Control plane failures.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The remote command ran but reported failure.
    #[error("`{command}` failed: {output}")]
    Command { command: String, output: String },

    #[error("failed to launch `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse control plane output: {0}")]
    Parse(String),
}

pub(crate) fn store_io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}
