//! Shared reconcile entrypoint used by the CLI and the daemon loop.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use dagger_core::desired::read_desired_set;
use dagger_core::{ControlPlane, EnvSettings, ObjectStore, RemoteRoot};

use crate::apply::{ApplyExecutor, ApplyOptions, ApplyReport};
use crate::bulk::upload_folder;
use crate::error::SyncError;
use crate::plan::{PlanReport, Planner};

/// What one reconcile run did.
#[derive(Debug)]
pub struct SyncRun {
    pub remote: RemoteRoot,
    pub plan: PlanReport,
    /// `None` on a dry run.
    pub apply: Option<ApplyReport>,
    /// Files copied into `plugins/` and `data/`.
    pub support_files: usize,
}

impl SyncRun {
    pub fn is_success(&self) -> bool {
        self.apply.as_ref().map_or(true, ApplyReport::is_success)
    }
}

/// One environment's collaborators and settings.
pub struct Reconciler {
    control: Arc<dyn ControlPlane>,
    store: Arc<dyn ObjectStore>,
    settings: EnvSettings,
}

impl Reconciler {
    pub fn new(
        control: Arc<dyn ControlPlane>,
        store: Arc<dyn ObjectStore>,
        settings: EnvSettings,
    ) -> Self {
        Self {
            control,
            store,
            settings,
        }
    }

    pub fn settings(&self) -> &EnvSettings {
        &self.settings
    }

    /// The configured DAG prefix, or the one the environment reports.
    pub async fn remote_root(&self) -> Result<RemoteRoot, SyncError> {
        if let Some(root) = &self.settings.dag_prefix {
            return Ok(root.clone());
        }
        let raw = self.control.describe().await.map_err(SyncError::Describe)?;
        Ok(raw.parse::<RemoteRoot>()?)
    }

    /// Plan, and unless `dry_run`, upload support folders and apply.
    pub async fn run_once(
        &self,
        dry_run: bool,
        cancel: CancellationToken,
    ) -> Result<SyncRun, SyncError> {
        let remote = self.remote_root().await?;
        tracing::info!(env = %self.settings.name, remote = %remote, dry_run, "reconciling");

        let mut support_files = 0;
        if !dry_run {
            let folders = [
                (self.settings.plugins_dir.as_ref(), "plugins"),
                (self.settings.data_dir.as_ref(), "data"),
            ];
            for (dir, folder) in folders
                .into_iter()
                .filter_map(|(dir, folder)| dir.map(|dir| (dir, folder)))
            {
                if !dir.exists() {
                    tracing::debug!(folder, local = %dir.display(), "support folder absent, skipping");
                    continue;
                }
                support_files += upload_folder(self.store.as_ref(), dir, folder).await?;
            }
        }

        let desired = read_desired_set(&self.settings.running_dags)?;
        let observed = self
            .control
            .list_running()
            .await
            .map_err(SyncError::ListRunning)?;

        let planner = Planner::new(
            Arc::clone(&self.store),
            &self.settings.dags_dir,
            remote.clone(),
        );
        let plan = planner.plan_report(&desired, &observed).await?;

        let apply = if dry_run {
            None
        } else {
            let executor = ApplyExecutor::new(
                Arc::clone(&self.control),
                Arc::clone(&self.store),
                &self.settings.dags_dir,
                remote.clone(),
                ApplyOptions::from_settings(&self.settings),
            )
            .with_cancellation(cancel);
            Some(executor.apply(&plan.plan).await)
        };

        Ok(SyncRun {
            remote,
            plan,
            apply,
            support_files,
        })
    }
}
