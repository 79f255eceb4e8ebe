//! # dagger-sync
//!
//! Reconciliation planning and plan execution.
//!
//! Call [`Planner::plan`] to turn a desired and an observed DAG set into a
//! resolved [`ReconciliationPlan`](dagger_core::ReconciliationPlan), then
//! [`ApplyExecutor::apply`] to carry it out. [`Reconciler::run_once`] does
//! both, end to end, for one configured environment.

pub mod apply;
pub mod bulk;
pub mod compare;
pub mod diff;
pub mod error;
pub mod pipeline;
pub mod plan;
pub mod remote;
pub mod retry;

use std::path::{Path, PathBuf};

use dagger_core::RelPath;

pub use apply::{ApplyExecutor, ApplyOptions, ApplyReport, DagOutcome, Phase, Step};
pub use diff::{raw_diff, RawDiff};
pub use error::{ApplyError, CompareError, PlanError, SyncError};
pub use pipeline::{Reconciler, SyncRun};
pub use plan::{PlanReport, Planner};
pub use retry::RetryPolicy;

/// Working-tree path for a `/`-separated relative path.
pub(crate) fn local_path(root: &Path, rel: &RelPath) -> PathBuf {
    rel.as_str()
        .split('/')
        .filter(|seg| !seg.is_empty())
        .fold(root.to_path_buf(), |acc, seg| acc.join(seg))
}
