//! Control plane seam: the remote service that lists, pauses, unpauses and
//! purges DAGs in the orchestration environment.

use async_trait::async_trait;

use crate::error::ControlError;
use crate::types::{DagId, DagSet};

/// Commands the reconciler issues against the orchestration environment.
///
/// Every call is independently network-fallible. Implementations must be
/// safe to call concurrently for different DAG ids.
#[async_trait]
pub trait ControlPlane: Send + Sync + 'static {
    /// DAGs currently known to the environment.
    async fn list_running(&self) -> Result<DagSet, ControlError>;

    async fn pause(&self, dag: &DagId) -> Result<String, ControlError>;

    async fn unpause(&self, dag: &DagId) -> Result<String, ControlError>;

    /// Remove the DAG's run history and metadata.
    async fn purge_metadata(&self, dag: &DagId) -> Result<String, ControlError>;

    /// The `gs://<bucket>/<prefix>` the environment loads DAG files from.
    async fn describe(&self) -> Result<String, ControlError>;
}
