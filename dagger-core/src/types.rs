//! Domain types for DAG reconciliation.
//!
//! Relative paths inside a tree are always `/`-separated [`RelPath`]s so the
//! same value addresses a local file and a remote object key.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Extension stripped from a file name to derive its [`DagId`].
pub const DAG_FILE_EXTENSION: &str = ".py";

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Identifier of a workflow: the base name of its definition file without
/// the `.py` extension.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DagId(pub String);

impl DagId {
    /// Derive the id for a file base name, e.g. `etl_daily.py` → `etl_daily`.
    pub fn from_file_name(name: &str) -> Self {
        Self(
            name.strip_suffix(DAG_FILE_EXTENSION)
                .unwrap_or(name)
                .to_owned(),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for DagId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DagId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A `/`-separated path relative to a tree root.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelPath(pub String);

impl RelPath {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `true` when the path stays inside its root: not absolute, no `..`
    /// segments and no empty segments.
    pub fn is_contained(&self) -> bool {
        !self.0.is_empty()
            && !self.0.starts_with('/')
            && self
                .0
                .split('/')
                .all(|seg| !seg.is_empty() && seg != "..")
    }
}

impl fmt::Display for RelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for RelPath {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RelPath {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A set of DAG ids. Ordered so plans and logs are deterministic.
pub type DagSet = BTreeSet<DagId>;

/// Build a [`DagSet`] from string-like ids.
pub fn dag_set<I, S>(ids: I) -> DagSet
where
    I: IntoIterator<Item = S>,
    S: Into<DagId>,
{
    ids.into_iter().map(Into::into).collect()
}

// ---------------------------------------------------------------------------
// Remote root
// ---------------------------------------------------------------------------

/// Location DAG files are deployed to: `gs://<bucket>/<prefix>`.
///
/// The object for one DAG lives at `<prefix>/<rel_path>` inside the bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRoot {
    pub bucket: String,
    pub prefix: String,
}

impl RemoteRoot {
    /// Object key for a path relative to this root.
    pub fn object_key(&self, rel: &RelPath) -> String {
        if self.prefix.is_empty() {
            rel.0.clone()
        } else {
            format!("{}/{}", self.prefix, rel.0)
        }
    }

    /// Prefix to list when snapshotting the remote tree (always ends in `/`
    /// unless the root is the whole bucket).
    pub fn list_prefix(&self) -> String {
        if self.prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", self.prefix)
        }
    }

    /// Bucket-level key for a sibling folder such as `plugins` or `data`.
    pub fn sibling_key(folder: &str, rel: &RelPath) -> String {
        format!("{folder}/{}", rel.0)
    }
}

impl FromStr for RemoteRoot {
    type Err = ConfigError;

    /// Parse `gs://bucket/dags` (or `gs://bucket/nested/dags`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ConfigError::MalformedRemoteRoot {
            value: s.to_owned(),
        };
        let rest = s.trim().strip_prefix("gs://").ok_or_else(malformed)?;
        let rest = rest.trim_end_matches('/');
        let (bucket, prefix) = match rest.split_once('/') {
            Some((bucket, prefix)) => (bucket, prefix),
            None => (rest, ""),
        };
        if bucket.is_empty() {
            return Err(malformed());
        }
        Ok(Self {
            bucket: bucket.to_owned(),
            prefix: prefix.to_owned(),
        })
    }
}

impl fmt::Display for RemoteRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.prefix.is_empty() {
            write!(f, "gs://{}", self.bucket)
        } else {
            write!(f, "gs://{}/{}", self.bucket, self.prefix)
        }
    }
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// Fully resolved stop/start plan for one reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationPlan {
    /// DAGs to pause, delete and purge, keyed to their deployed path.
    pub to_stop: BTreeMap<DagId, RelPath>,
    /// DAGs to upload and unpause, keyed to their path in the working tree.
    pub to_start: BTreeMap<DagId, RelPath>,
    /// Desired-and-running DAGs whose content changed; present in both maps.
    pub drifted: DagSet,
}

impl ReconciliationPlan {
    pub fn is_empty(&self) -> bool {
        self.to_stop.is_empty() && self.to_start.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dag_id_strips_python_extension() {
        assert_eq!(DagId::from_file_name("etl_daily.py"), DagId::from("etl_daily"));
        assert_eq!(DagId::from_file_name("README"), DagId::from("README"));
        assert_eq!(DagId::from_file_name("a.py.bak"), DagId::from("a.py.bak"));
    }

    #[test]
    fn rel_path_containment() {
        assert!(RelPath::from("team/etl.py").is_contained());
        assert!(!RelPath::from("/etc/passwd").is_contained());
        assert!(!RelPath::from("../escape.py").is_contained());
        assert!(!RelPath::from("a//b.py").is_contained());
        assert!(!RelPath::from("").is_contained());
    }

    #[test]
    fn remote_root_parses_bucket_and_prefix() {
        let root: RemoteRoot = "gs://us-central1-env-bucket/dags".parse().unwrap();
        assert_eq!(root.bucket, "us-central1-env-bucket");
        assert_eq!(root.prefix, "dags");
        assert_eq!(root.object_key(&RelPath::from("x/a.py")), "dags/x/a.py");
        assert_eq!(root.list_prefix(), "dags/");
        assert_eq!(root.to_string(), "gs://us-central1-env-bucket/dags");
    }

    #[test]
    fn sibling_keys_sit_at_bucket_root() {
        assert_eq!(
            RemoteRoot::sibling_key("plugins", &RelPath::from("hooks/http.py")),
            "plugins/hooks/http.py"
        );
    }

    #[test]
    fn remote_root_without_prefix() {
        let root: RemoteRoot = "gs://bucket/".parse().unwrap();
        assert_eq!(root.prefix, "");
        assert_eq!(root.object_key(&RelPath::from("a.py")), "a.py");
        assert_eq!(root.list_prefix(), "");
    }

    #[test]
    fn remote_root_rejects_other_schemes() {
        assert!("s3://bucket/dags".parse::<RemoteRoot>().is_err());
        assert!("gs:///dags".parse::<RemoteRoot>().is_err());
    }

    #[test]
    fn empty_plan() {
        let plan = ReconciliationPlan::default();
        assert!(plan.is_empty());
    }
}
