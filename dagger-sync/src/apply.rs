//! Concurrent execution of a [`ReconciliationPlan`].
//!
//! The stop phase drains completely before the start phase begins. Within a
//! phase every DAG gets its own task; a semaphore caps how many run at once.
//! Each task returns a typed [`DagOutcome`] through the `JoinSet`, so one
//! DAG's failure never affects its siblings.
//!
//! Per DAG:
//!
//! - **stop**: pause → delete object → purge metadata (retried)
//! - **start**: best-effort delete of a stale object → upload → unpause
//!   (retried with jitter)
//!
//! After the start phase the monitoring DAG is unpaused once; its result is
//! reported but never fails the run.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use dagger_core::config::{
    DEFAULT_CALL_TIMEOUT, DEFAULT_CONCURRENCY, DEFAULT_MONITORING_DAG,
};
use dagger_core::{
    ControlPlane, DagId, EnvSettings, ObjectStore, ReconciliationPlan, RelPath, RemoteRoot,
    StoreError,
};

use crate::error::ApplyError;
use crate::local_path;
use crate::retry::{bounded, retry, RetryPolicy, PURGE_RETRY, UNPAUSE_RETRY};

// ---------------------------------------------------------------------------
// Steps and phases
// ---------------------------------------------------------------------------

/// One collaborator call inside a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Pause,
    Delete,
    Purge,
    PreDelete,
    Upload,
    Unpause,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Step::Pause => "pause",
            Step::Delete => "delete",
            Step::Purge => "purge metadata",
            Step::PreDelete => "pre-delete",
            Step::Upload => "upload",
            Step::Unpause => "unpause",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Stop,
    Start,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Stop => "stop",
            Phase::Start => "start",
        })
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Maximum simultaneous workers per phase. `None` is unbounded.
    pub concurrency: Option<usize>,
    /// Deadline for every individual collaborator call.
    pub call_timeout: Duration,
    pub purge_retry: RetryPolicy,
    pub unpause_retry: RetryPolicy,
    /// Unpaused once after the start phase. `None` skips it.
    pub monitoring_dag: Option<DagId>,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            concurrency: Some(DEFAULT_CONCURRENCY),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            purge_retry: PURGE_RETRY,
            unpause_retry: UNPAUSE_RETRY,
            monitoring_dag: Some(DagId::from(DEFAULT_MONITORING_DAG)),
        }
    }
}

impl ApplyOptions {
    pub fn from_settings(settings: &EnvSettings) -> Self {
        Self {
            concurrency: settings.concurrency,
            call_timeout: settings.call_timeout,
            monitoring_dag: Some(settings.monitoring_dag.clone()),
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Result of one DAG's stop or start.
#[derive(Debug)]
pub struct DagOutcome {
    pub dag: DagId,
    pub phase: Phase,
    pub rel: RelPath,
    pub result: Result<(), ApplyError>,
    /// Non-fatal problems, such as a failed pre-delete.
    pub warnings: Vec<String>,
}

impl DagOutcome {
    fn failed(dag: DagId, phase: Phase, rel: RelPath, error: ApplyError) -> Self {
        Self {
            dag,
            phase,
            rel,
            result: Err(error),
            warnings: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn error(&self) -> Option<&ApplyError> {
        self.result.as_ref().err()
    }
}

#[derive(Debug, Serialize)]
struct OutcomeRecord<'a> {
    dag: &'a DagId,
    phase: Phase,
    path: &'a RelPath,
    ok: bool,
    error: Option<String>,
    warnings: &'a [String],
}

#[derive(Debug)]
pub struct ApplyReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Stop outcomes first, then start outcomes; each sorted by id.
    pub outcomes: Vec<DagOutcome>,
    /// `None` when no monitoring DAG is configured or the start phase was
    /// skipped.
    pub monitoring: Option<Result<(), ApplyError>>,
    /// Set when cancellation arrived during the stop phase and there was
    /// something to start.
    pub start_skipped: bool,
}

impl ApplyReport {
    pub fn failures(&self) -> impl Iterator<Item = &DagOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    pub fn phase(&self, phase: Phase) -> impl Iterator<Item = &DagOutcome> {
        self.outcomes.iter().filter(move |o| o.phase == phase)
    }

    pub fn is_success(&self) -> bool {
        !self.start_skipped && self.failures().next().is_none()
    }

    pub fn to_json(&self) -> serde_json::Value {
        let outcomes: Vec<OutcomeRecord<'_>> = self
            .outcomes
            .iter()
            .map(|o| OutcomeRecord {
                dag: &o.dag,
                phase: o.phase,
                path: &o.rel,
                ok: o.is_success(),
                error: o.error().map(ToString::to_string),
                warnings: &o.warnings,
            })
            .collect();
        let monitoring = self.monitoring.as_ref().map(|res| match res {
            Ok(()) => json!({ "ok": true }),
            Err(err) => json!({ "ok": false, "error": err.to_string() }),
        });
        json!({
            "started_at": self.started_at,
            "finished_at": self.finished_at,
            "start_skipped": self.start_skipped,
            "outcomes": outcomes,
            "monitoring": monitoring,
        })
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

pub struct ApplyExecutor {
    control: Arc<dyn ControlPlane>,
    store: Arc<dyn ObjectStore>,
    local_root: PathBuf,
    remote: RemoteRoot,
    options: ApplyOptions,
    cancel: CancellationToken,
}

impl ApplyExecutor {
    pub fn new(
        control: Arc<dyn ControlPlane>,
        store: Arc<dyn ObjectStore>,
        local_root: impl Into<PathBuf>,
        remote: RemoteRoot,
        options: ApplyOptions,
    ) -> Self {
        Self {
            control,
            store,
            local_root: local_root.into(),
            remote,
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Use `cancel` instead of a private token, so a caller can abort the run.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn apply(&self, plan: &ReconciliationPlan) -> ApplyReport {
        let started_at = Utc::now();
        tracing::info!(
            stop = plan.to_stop.len(),
            start = plan.to_start.len(),
            "applying plan"
        );

        let mut outcomes = self.run_phase(Phase::Stop, &plan.to_stop).await;

        let mut monitoring = None;
        let start_skipped = self.cancel.is_cancelled() && !plan.to_start.is_empty();
        if start_skipped {
            tracing::warn!(
                skipped = plan.to_start.len(),
                "cancelled during stop phase, not starting DAGs"
            );
        } else {
            outcomes.extend(self.run_phase(Phase::Start, &plan.to_start).await);
            if let Some(dag) = &self.options.monitoring_dag {
                monitoring = Some(self.unpause_monitoring(dag).await);
            }
        }

        let report = ApplyReport {
            started_at,
            finished_at: Utc::now(),
            outcomes,
            monitoring,
            start_skipped,
        };
        tracing::info!(
            dags = report.outcomes.len(),
            failed = report.failures().count(),
            "apply finished"
        );
        report
    }

    fn worker(&self) -> Worker {
        Worker {
            control: Arc::clone(&self.control),
            store: Arc::clone(&self.store),
            local_root: self.local_root.clone(),
            remote: self.remote.clone(),
            options: self.options.clone(),
            cancel: self.cancel.clone(),
        }
    }

    async fn run_phase(&self, phase: Phase, entries: &BTreeMap<DagId, RelPath>) -> Vec<DagOutcome> {
        if entries.is_empty() {
            return Vec::new();
        }
        tracing::info!(%phase, dags = entries.len(), "starting phase");

        let permits = self
            .options
            .concurrency
            .map(|n| Arc::new(Semaphore::new(n.max(1))));
        let mut set = JoinSet::new();
        for (dag, rel) in entries {
            let worker = self.worker();
            let permits = permits.clone();
            let (dag, rel) = (dag.clone(), rel.clone());
            set.spawn(async move {
                let _permit = match permits {
                    Some(sem) => sem.acquire_owned().await.ok(),
                    None => None,
                };
                // A panic here surfaces as a JoinError for this DAG only.
                let task = tokio::spawn(worker.run(phase, dag.clone(), rel.clone()));
                match task.await {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        let error = ApplyError::Panicked(join_message(err));
                        tracing::error!(dag = %dag, %phase, error = %error, "worker died");
                        DagOutcome::failed(dag, phase, rel, error)
                    }
                }
            });
        }

        let mut outcomes = Vec::with_capacity(entries.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => tracing::error!(%phase, error = %err, "phase task failed to join"),
            }
        }
        outcomes.sort_by(|a, b| a.dag.cmp(&b.dag));
        outcomes
    }

    async fn unpause_monitoring(&self, dag: &DagId) -> Result<(), ApplyError> {
        let result = bounded(
            Step::Unpause,
            self.options.call_timeout,
            &self.cancel,
            self.control.unpause(dag),
        )
        .await
        .and_then(|res| {
            res.map(|_| ()).map_err(|source| ApplyError::Control {
                step: Step::Unpause,
                source,
            })
        });
        match &result {
            Ok(()) => tracing::info!(dag = %dag, "unpaused monitoring DAG"),
            Err(err) => tracing::warn!(dag = %dag, error = %err, "couldn't unpause monitoring DAG"),
        }
        result
    }
}

fn join_message(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_owned()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Owned snapshot of everything one DAG's task needs.
struct Worker {
    control: Arc<dyn ControlPlane>,
    store: Arc<dyn ObjectStore>,
    local_root: PathBuf,
    remote: RemoteRoot,
    options: ApplyOptions,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self, phase: Phase, dag: DagId, rel: RelPath) -> DagOutcome {
        let mut warnings = Vec::new();
        let result = if !rel.is_contained() {
            Err(ApplyError::MalformedPath {
                path: rel.to_string(),
            })
        } else {
            match phase {
                Phase::Stop => self.stop(&dag, &rel).await,
                Phase::Start => self.start(&dag, &rel, &mut warnings).await,
            }
        };
        match &result {
            Ok(()) => tracing::info!(dag = %dag, rel = %rel, %phase, "done"),
            Err(err) => tracing::error!(dag = %dag, rel = %rel, %phase, error = %err, "failed"),
        }
        DagOutcome {
            dag,
            phase,
            rel,
            result,
            warnings,
        }
    }

    async fn stop(&self, dag: &DagId, rel: &RelPath) -> Result<(), ApplyError> {
        let timeout = self.options.call_timeout;
        tracing::info!(dag = %dag, rel = %rel, "stopping DAG");

        bounded(Step::Pause, timeout, &self.cancel, self.control.pause(dag))
            .await?
            .map_err(|source| ApplyError::Control {
                step: Step::Pause,
                source,
            })?;

        let key = self.remote.object_key(rel);
        bounded(Step::Delete, timeout, &self.cancel, self.store.delete(&key))
            .await?
            .map_err(|source| ApplyError::Store {
                step: Step::Delete,
                source,
            })?;

        let (_, attempt) = retry(
            Step::Purge,
            self.options.purge_retry,
            timeout,
            &self.cancel,
            move || self.control.purge_metadata(dag),
        )
        .await?;
        tracing::debug!(dag = %dag, attempt, "metadata purged");
        Ok(())
    }

    async fn start(
        &self,
        dag: &DagId,
        rel: &RelPath,
        warnings: &mut Vec<String>,
    ) -> Result<(), ApplyError> {
        let timeout = self.options.call_timeout;
        let key = self.remote.object_key(rel);
        tracing::info!(dag = %dag, rel = %rel, "starting DAG");

        let pre_delete = bounded(Step::PreDelete, timeout, &self.cancel, self.store.delete(&key)).await;
        let warning = match pre_delete {
            Ok(Ok(())) => {
                tracing::debug!(key = %key, "removed stale object");
                None
            }
            Ok(Err(StoreError::NotFound { .. })) => None,
            Ok(Err(err)) => Some(err.to_string()),
            Err(ApplyError::Cancelled) => return Err(ApplyError::Cancelled),
            Err(err) => Some(err.to_string()),
        };
        if let Some(reason) = warning {
            tracing::warn!(dag = %dag, key = %key, error = %reason, "pre-delete failed, uploading anyway");
            warnings.push(format!("pre-delete of {key} failed: {reason}"));
        }

        let local = local_path(&self.local_root, rel);
        bounded(Step::Upload, timeout, &self.cancel, self.store.upload(&key, &local))
            .await?
            .map_err(|source| ApplyError::Store {
                step: Step::Upload,
                source,
            })?;
        tracing::info!(dag = %dag, key = %key, "uploaded");

        let (_, attempt) = retry(
            Step::Unpause,
            self.options.unpause_retry,
            timeout,
            &self.cancel,
            move || self.control.unpause(dag),
        )
        .await?;
        tracing::debug!(dag = %dag, attempt, "unpaused");
        Ok(())
    }
}
