//! Environment configuration.
//!
//! # Storage layout
//!
//! ```text
//! ~/.dagger/
//!   config.yaml     (optional; every key may also come from a CLI flag)
//! ```
//!
//! # API pattern
//!
//! As with every home-rooted helper in this workspace:
//! - `fn_at(home: &Path, …)` takes an explicit home and is what tests call
//! - `fn(…)` derives home from `dirs::home_dir()` and delegates to `_at`
//!
//! [`DaggerConfig`] is the loose, all-optional form read from YAML and
//! overlaid with flags; [`DaggerConfig::validate`] turns it into
//! [`EnvSettings`], rejecting missing required keys before any
//! reconciliation begins.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{DagId, RemoteRoot};

pub const DEFAULT_DAGS_DIR: &str = "./dags";
pub const DEFAULT_RUNNING_DAGS: &str = "./config/running_dags.txt";
pub const DEFAULT_PLUGINS_DIR: &str = "./plugins";
pub const DEFAULT_DATA_DIR: &str = "./data";
pub const DEFAULT_MONITORING_DAG: &str = "airflow_monitoring";
pub const DEFAULT_CONCURRENCY: usize = 16;
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Raw (file + flags) form
// ---------------------------------------------------------------------------

/// Configuration as read from `config.yaml`, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DaggerConfig {
    /// Composer environment name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dags_dir: Option<PathBuf>,
    /// Newline-delimited list of DAGs that should be running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running_dags: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugins_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    /// Local mount of the environment bucket.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_dir: Option<PathBuf>,
    /// `gs://<bucket>/<prefix>`; asked from the control plane when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dag_prefix: Option<String>,
    /// Max concurrent workers per phase; `0` means unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitoring_dag: Option<String>,
}

impl DaggerConfig {
    /// Overlay `other` on top of `self`: every key set in `other` wins.
    pub fn merge(self, other: DaggerConfig) -> DaggerConfig {
        DaggerConfig {
            name: other.name.or(self.name),
            project: other.project.or(self.project),
            location: other.location.or(self.location),
            dags_dir: other.dags_dir.or(self.dags_dir),
            running_dags: other.running_dags.or(self.running_dags),
            plugins_dir: other.plugins_dir.or(self.plugins_dir),
            data_dir: other.data_dir.or(self.data_dir),
            bucket_dir: other.bucket_dir.or(self.bucket_dir),
            dag_prefix: other.dag_prefix.or(self.dag_prefix),
            concurrency: other.concurrency.or(self.concurrency),
            call_timeout_secs: other.call_timeout_secs.or(self.call_timeout_secs),
            interval_secs: other.interval_secs.or(self.interval_secs),
            monitoring_dag: other.monitoring_dag.or(self.monitoring_dag),
        }
    }

    /// Check required keys and apply defaults.
    pub fn validate(self) -> Result<EnvSettings, ConfigError> {
        let dag_prefix = match non_empty(self.dag_prefix) {
            Some(raw) => Some(raw.parse::<RemoteRoot>()?),
            None => None,
        };
        let concurrency = match self.concurrency.unwrap_or(DEFAULT_CONCURRENCY) {
            0 => None,
            n => Some(n),
        };

        Ok(EnvSettings {
            name: required("name", self.name)?,
            project: required("project", self.project)?,
            location: required("location", self.location)?,
            dags_dir: required_path(
                "dags_dir",
                self.dags_dir.or_else(|| Some(DEFAULT_DAGS_DIR.into())),
            )?,
            running_dags: required_path(
                "running_dags",
                self.running_dags
                    .or_else(|| Some(DEFAULT_RUNNING_DAGS.into())),
            )?,
            plugins_dir: folder_or_default(self.plugins_dir, DEFAULT_PLUGINS_DIR),
            data_dir: folder_or_default(self.data_dir, DEFAULT_DATA_DIR),
            bucket_dir: required_path("bucket_dir", self.bucket_dir)?,
            dag_prefix,
            concurrency,
            call_timeout: self
                .call_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_CALL_TIMEOUT),
            interval: self
                .interval_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_INTERVAL),
            monitoring_dag: DagId::from(
                non_empty(self.monitoring_dag)
                    .unwrap_or_else(|| DEFAULT_MONITORING_DAG.to_owned()),
            ),
        })
    }
}

// ---------------------------------------------------------------------------
// Validated form
// ---------------------------------------------------------------------------

/// Validated settings for one Composer environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvSettings {
    pub name: String,
    pub project: String,
    pub location: String,
    pub dags_dir: PathBuf,
    pub running_dags: PathBuf,
    pub plugins_dir: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub bucket_dir: PathBuf,
    pub dag_prefix: Option<RemoteRoot>,
    /// `None` means one worker per DAG with no cap.
    pub concurrency: Option<usize>,
    pub call_timeout: Duration,
    pub interval: Duration,
    pub monitoring_dag: DagId,
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// `<home>/.dagger/config.yaml`: pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    home.join(".dagger").join("config.yaml")
}

/// Load the config at `<home>/.dagger/config.yaml`.
///
/// A missing file is not an error: it yields an empty [`DaggerConfig`] so
/// flags alone can drive a run.
pub fn load_at(home: &Path) -> Result<DaggerConfig, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Ok(DaggerConfig::default());
    }
    load_file(&path)
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<DaggerConfig, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
    load_at(&home)
}

/// Load an explicit config file; unlike [`load_at`] the file must exist.
pub fn load_file(path: &Path) -> Result<DaggerConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    if contents.trim().is_empty() {
        return Ok(DaggerConfig::default());
    }
    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

fn non_empty_path(value: Option<PathBuf>) -> Option<PathBuf> {
    value.filter(|p| !p.as_os_str().is_empty())
}

/// Unset falls back to `default`; an explicit empty path turns the folder off.
fn folder_or_default(value: Option<PathBuf>, default: &str) -> Option<PathBuf> {
    match value {
        None => Some(default.into()),
        set => non_empty_path(set),
    }
}

fn required(key: &'static str, value: Option<String>) -> Result<String, ConfigError> {
    non_empty(value).ok_or(ConfigError::Missing { key })
}

fn required_path(key: &'static str, value: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
    non_empty_path(value).ok_or(ConfigError::Missing { key })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> DaggerConfig {
        DaggerConfig {
            name: Some("env".into()),
            project: Some("proj".into()),
            location: Some("europe-west1".into()),
            bucket_dir: Some("/mnt/bucket".into()),
            ..DaggerConfig::default()
        }
    }

    #[test]
    fn defaults_applied() {
        let settings = complete().validate().unwrap();
        assert_eq!(settings.dags_dir, PathBuf::from(DEFAULT_DAGS_DIR));
        assert_eq!(settings.running_dags, PathBuf::from(DEFAULT_RUNNING_DAGS));
        assert_eq!(settings.concurrency, Some(DEFAULT_CONCURRENCY));
        assert_eq!(settings.call_timeout, DEFAULT_CALL_TIMEOUT);
        assert_eq!(settings.monitoring_dag, DagId::from(DEFAULT_MONITORING_DAG));
        assert!(settings.dag_prefix.is_none());
        assert_eq!(settings.plugins_dir, Some(PathBuf::from(DEFAULT_PLUGINS_DIR)));
        assert_eq!(settings.data_dir, Some(PathBuf::from(DEFAULT_DATA_DIR)));
    }

    #[test]
    fn empty_folder_path_disables_upload() {
        let cfg = DaggerConfig {
            plugins_dir: Some(PathBuf::new()),
            data_dir: Some("/srv/data".into()),
            ..complete()
        };
        let settings = cfg.validate().unwrap();
        assert_eq!(settings.plugins_dir, None);
        assert_eq!(settings.data_dir, Some(PathBuf::from("/srv/data")));
    }

    #[test]
    fn zero_concurrency_means_unbounded() {
        let cfg = DaggerConfig {
            concurrency: Some(0),
            ..complete()
        };
        assert_eq!(cfg.validate().unwrap().concurrency, None);
    }

    #[test]
    fn blank_required_key_is_missing() {
        let cfg = DaggerConfig {
            location: Some("  ".into()),
            ..complete()
        };
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Missing { key: "location" }), "got: {err}");
    }

    #[test]
    fn flags_override_file() {
        let file = DaggerConfig {
            name: Some("from-file".into()),
            interval_secs: Some(30),
            ..complete()
        };
        let flags = DaggerConfig {
            name: Some("from-flag".into()),
            ..DaggerConfig::default()
        };
        let merged = file.merge(flags);
        assert_eq!(merged.name.as_deref(), Some("from-flag"));
        assert_eq!(merged.interval_secs, Some(30));
    }

    #[test]
    fn malformed_prefix_rejected() {
        let cfg = DaggerConfig {
            dag_prefix: Some("bucket/dags".into()),
            ..complete()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::MalformedRemoteRoot { .. })
        ));
    }
}
