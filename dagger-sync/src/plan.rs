//! Reconciliation planning.
//!
//! 1. Split desired and observed into stop / start / same.
//! 2. Resolve `same` in the deployed tree and compare each file with the
//!    working copy. Anything that differs, or can't be compared, is
//!    restarted: it joins both stop and start.
//! 3. Resolve the stop set in the deployed tree and the start set in the
//!    working tree.
//!
//! Any resolution defect fails the whole plan. The deployed tree is listed
//! once per plan; each resolve pass still builds its own ignore index.

use std::path::PathBuf;
use std::sync::Arc;

use dagger_core::{DagSet, ObjectStore, ReconciliationPlan, RemoteRoot};
use dagger_resolver::{resolve, ListedTree, LocalTree};

use crate::compare::content_equals;
use crate::diff::{raw_diff, RawDiff};
use crate::error::PlanError;
use crate::local_path;
use crate::remote::snapshot;

/// A plan together with the set split it was derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanReport {
    pub raw: RawDiff,
    pub plan: ReconciliationPlan,
}

pub struct Planner {
    store: Arc<dyn ObjectStore>,
    local_root: PathBuf,
    remote: RemoteRoot,
}

impl Planner {
    pub fn new(store: Arc<dyn ObjectStore>, local_root: impl Into<PathBuf>, remote: RemoteRoot) -> Self {
        Self {
            store,
            local_root: local_root.into(),
            remote,
        }
    }

    pub async fn plan(
        &self,
        desired: &DagSet,
        observed: &DagSet,
    ) -> Result<ReconciliationPlan, PlanError> {
        Ok(self.plan_report(desired, observed).await?.plan)
    }

    pub async fn plan_report(&self, desired: &DagSet, observed: &DagSet) -> Result<PlanReport, PlanError> {
        let raw = raw_diff(desired, observed);
        tracing::info!(
            stop = raw.to_stop.len(),
            start = raw.to_start.len(),
            same = raw.same.len(),
            "computed set difference"
        );

        let remote_tree = if raw.to_stop.is_empty() && raw.same.is_empty() {
            ListedTree::default()
        } else {
            snapshot(self.store.as_ref(), &self.remote)
                .await
                .map_err(PlanError::Snapshot)?
        };

        let drifted = self.drifted(&remote_tree, &raw.same).await?;
        let mut to_stop = raw.to_stop.clone();
        let mut to_start = raw.to_start.clone();
        to_stop.extend(drifted.iter().cloned());
        to_start.extend(drifted.iter().cloned());

        let stop = resolve(&remote_tree, &to_stop)?;
        let start = resolve(&LocalTree::new(&self.local_root), &to_start)?;

        let plan = ReconciliationPlan {
            to_stop: stop.unique(),
            to_start: start.unique(),
            drifted,
        };
        tracing::info!(
            stop = plan.to_stop.len(),
            start = plan.to_start.len(),
            drifted = plan.drifted.len(),
            "plan ready"
        );
        Ok(PlanReport { raw, plan })
    }

    /// Ids in `same` whose deployed file differs from the working copy.
    async fn drifted(&self, remote_tree: &ListedTree, same: &DagSet) -> Result<DagSet, PlanError> {
        let deployed = resolve(remote_tree, same)?;
        let mut drifted = DagSet::new();
        for (dag, rel) in deployed.unique() {
            let local = local_path(&self.local_root, &rel);
            let key = self.remote.object_key(&rel);
            match content_equals(&local, self.store.as_ref(), &key).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::info!(dag = %dag, rel = %rel, "content changed, restarting");
                    drifted.insert(dag);
                }
                Err(err) => {
                    tracing::warn!(dag = %dag, rel = %rel, error = %err, "couldn't compare, restarting");
                    drifted.insert(dag);
                }
            }
        }
        Ok(drifted)
    }
}
