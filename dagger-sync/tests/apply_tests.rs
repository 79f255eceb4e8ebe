mod common;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dagger_core::{DagId, DagSet, MemoryObjectStore, ReconciliationPlan, RelPath};
use dagger_sync::retry::RetryPolicy;
use dagger_sync::{ApplyError, ApplyExecutor, ApplyOptions, Phase, Step};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use common::{deploy, remote_root, write_tree, Op, ScriptedControlPlane};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn entries(pairs: &[(&str, &str)]) -> BTreeMap<DagId, RelPath> {
    pairs
        .iter()
        .map(|(dag, rel)| (DagId::from(*dag), RelPath::from(*rel)))
        .collect()
}

fn plan(stop: &[(&str, &str)], start: &[(&str, &str)]) -> ReconciliationPlan {
    ReconciliationPlan {
        to_stop: entries(stop),
        to_start: entries(start),
        drifted: DagSet::new(),
    }
}

fn executor(
    control: &ScriptedControlPlane,
    store: &MemoryObjectStore,
    local: &TempDir,
    options: ApplyOptions,
) -> ApplyExecutor {
    ApplyExecutor::new(
        Arc::new(control.clone()),
        Arc::new(store.clone()),
        local.path(),
        remote_root(),
        options,
    )
}

fn no_monitoring() -> ApplyOptions {
    ApplyOptions {
        monitoring_dag: None,
        ..ApplyOptions::default()
    }
}

// ---------------------------------------------------------------------------
// Stop phase
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true, flavor = "current_thread")]
async fn stop_pauses_deletes_and_purges() {
    let local = TempDir::new().expect("local");
    let store = MemoryObjectStore::new();
    deploy(&store, &[("team/c.py", "c")]);
    let control = ScriptedControlPlane::new(["c"]);

    let report = executor(&control, &store, &local, no_monitoring())
        .apply(&plan(&[("c", "team/c.py")], &[]))
        .await;

    assert!(report.is_success());
    assert_eq!(control.calls_for("c"), vec![Op::Pause, Op::Purge]);
    assert!(store.get("dags/team/c.py").is_none());
    assert!(control.running().is_empty());
}

#[tokio::test(start_paused = true, flavor = "current_thread")]
async fn purge_retries_until_fifth_attempt() {
    let local = TempDir::new().expect("local");
    let store = MemoryObjectStore::new();
    deploy(&store, &[("c.py", "c")]);
    let control = ScriptedControlPlane::new(["c"]);
    control.fail_times(Op::Purge, "c", 4);
    let started = tokio::time::Instant::now();

    let report = executor(&control, &store, &local, no_monitoring())
        .apply(&plan(&[("c", "c.py")], &[]))
        .await;

    assert!(report.is_success(), "{:?}", report.outcomes);
    assert_eq!(control.count(Op::Purge, "c"), 5);
    assert!(started.elapsed() >= Duration::from_secs(20));
}

#[tokio::test(start_paused = true, flavor = "current_thread")]
async fn failed_pause_isolates_one_dag() {
    let local = TempDir::new().expect("local");
    let store = MemoryObjectStore::new();
    deploy(&store, &[("a.py", "a"), ("b.py", "b")]);
    let control = ScriptedControlPlane::new(["a", "b"]);
    control.fail_always(Op::Pause, "a");

    let report = executor(&control, &store, &local, no_monitoring())
        .apply(&plan(&[("a", "a.py"), ("b", "b.py")], &[]))
        .await;

    assert!(!report.is_success());
    let failed: Vec<_> = report.failures().map(|o| o.dag.as_str()).collect();
    assert_eq!(failed, vec!["a"]);
    assert!(matches!(
        report.outcomes[0].error(),
        Some(ApplyError::Control { step: Step::Pause, .. })
    ));
    // Pause is not retried, and nothing after it runs.
    assert_eq!(control.calls_for("a"), vec![Op::Pause]);
    assert!(store.get("dags/a.py").is_some());
    assert!(store.get("dags/b.py").is_none());
}

#[tokio::test(start_paused = true, flavor = "current_thread")]
async fn malformed_path_is_never_attempted() {
    let local = TempDir::new().expect("local");
    let store = MemoryObjectStore::new();
    let control = ScriptedControlPlane::new(["x", "y"]);

    let report = executor(&control, &store, &local, no_monitoring())
        .apply(&plan(&[("x", "../x.py"), ("y", "/abs/y.py")], &[]))
        .await;

    assert_eq!(report.failures().count(), 2);
    for outcome in &report.outcomes {
        assert!(matches!(outcome.error(), Some(ApplyError::MalformedPath { .. })));
    }
    assert!(control.calls().is_empty());
}

// ---------------------------------------------------------------------------
// Start phase
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true, flavor = "current_thread")]
async fn start_uploads_and_unpauses() {
    let local = TempDir::new().expect("local");
    write_tree(local.path(), &[("team/a.py", "new")]);
    let store = MemoryObjectStore::new();
    deploy(&store, &[("team/a.py", "stale")]);
    let control = ScriptedControlPlane::new(Vec::<&str>::new());

    let report = executor(&control, &store, &local, ApplyOptions::default())
        .apply(&plan(&[], &[("a", "team/a.py")]))
        .await;

    assert!(report.is_success());
    assert_eq!(store.get("dags/team/a.py"), Some(b"new".to_vec()));
    assert_eq!(control.calls_for("a"), vec![Op::Unpause]);
    assert!(report.outcomes[0].warnings.is_empty());
    assert!(matches!(report.monitoring, Some(Ok(()))));
}

#[tokio::test(start_paused = true, flavor = "current_thread")]
async fn unpause_exhaustion_marks_dag_failed() {
    let local = TempDir::new().expect("local");
    write_tree(local.path(), &[("a.py", "a")]);
    let store = MemoryObjectStore::new();
    let control = ScriptedControlPlane::new(Vec::<&str>::new());
    control.fail_always(Op::Unpause, "a");
    let started = tokio::time::Instant::now();

    let report = executor(&control, &store, &local, no_monitoring())
        .apply(&plan(&[], &[("a", "a.py")]))
        .await;

    assert_eq!(control.count(Op::Unpause, "a"), 5);
    assert!(matches!(
        report.outcomes[0].error(),
        Some(ApplyError::RetriesExhausted { step: Step::Unpause, attempts: 5, .. })
    ));
    // Four jittered waits of roughly a minute each.
    assert!(started.elapsed() >= Duration::from_secs(4 * 50));
}

#[tokio::test(start_paused = true, flavor = "current_thread")]
async fn failed_pre_delete_is_a_warning() {
    let local = TempDir::new().expect("local");
    write_tree(local.path(), &[("a.py", "a")]);
    let store = MemoryObjectStore::new();
    deploy(&store, &[("a.py", "old")]);
    let control = ScriptedControlPlane::new(Vec::<&str>::new());

    // The injected failure hits both the delete and the upload of this key.
    store.fail_key("dags/a.py");
    let report = executor(&control, &store, &local, no_monitoring())
        .apply(&plan(&[], &[("a", "a.py")]))
        .await;

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.warnings.len(), 1);
    assert!(outcome.warnings[0].contains("pre-delete of dags/a.py failed"));
    assert!(matches!(
        outcome.error(),
        Some(ApplyError::Store { step: Step::Upload, .. })
    ));
}

#[tokio::test(start_paused = true, flavor = "current_thread")]
async fn missing_local_file_fails_upload() {
    let local = TempDir::new().expect("local");
    let store = MemoryObjectStore::new();
    let control = ScriptedControlPlane::new(Vec::<&str>::new());

    let report = executor(&control, &store, &local, no_monitoring())
        .apply(&plan(&[], &[("a", "a.py")]))
        .await;

    assert!(matches!(
        report.outcomes[0].error(),
        Some(ApplyError::Store { step: Step::Upload, .. })
    ));
    assert!(report.outcomes[0].warnings.is_empty(), "absent object is not a warning");
    assert!(control.calls().is_empty());
}

// ---------------------------------------------------------------------------
// Cross-cutting
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true, flavor = "current_thread")]
async fn stop_phase_finishes_before_start_phase() {
    let local = TempDir::new().expect("local");
    write_tree(local.path(), &[("b.py", "b2")]);
    let store = MemoryObjectStore::new();
    deploy(&store, &[("b.py", "b1"), ("c.py", "c")]);
    let control = ScriptedControlPlane::new(["b", "c"]).with_delay(Duration::from_secs(1));

    let report = executor(&control, &store, &local, no_monitoring())
        .apply(&plan(&[("b", "b.py"), ("c", "c.py")], &[("b", "b.py")]))
        .await;

    assert!(report.is_success());
    let calls = control.calls();
    let first_unpause = calls
        .iter()
        .position(|(op, _)| *op == Op::Unpause)
        .expect("unpause");
    let last_purge = calls
        .iter()
        .rposition(|(op, _)| *op == Op::Purge)
        .expect("purge");
    assert!(last_purge < first_unpause, "{calls:?}");
    assert_eq!(report.phase(Phase::Stop).count(), 2);
    assert_eq!(report.phase(Phase::Start).count(), 1);
}

#[tokio::test(start_paused = true, flavor = "current_thread")]
async fn concurrency_is_bounded_by_semaphore() {
    let local = TempDir::new().expect("local");
    let store = MemoryObjectStore::new();
    let ids: Vec<String> = (0..10).map(|i| format!("dag_{i}")).collect();
    let stops: Vec<(String, String)> = ids.iter().map(|id| (id.clone(), format!("{id}.py"))).collect();
    for (_, rel) in &stops {
        deploy(&store, &[(rel.as_str(), "x")]);
    }
    let control =
        ScriptedControlPlane::new(ids.iter().map(String::as_str)).with_delay(Duration::from_secs(1));
    let pairs: Vec<(&str, &str)> = stops.iter().map(|(a, b)| (a.as_str(), b.as_str())).collect();

    let options = ApplyOptions {
        concurrency: Some(3),
        ..no_monitoring()
    };
    let report = executor(&control, &store, &local, options)
        .apply(&plan(&pairs, &[]))
        .await;

    assert!(report.is_success());
    assert!(control.max_in_flight() <= 3, "{}", control.max_in_flight());
    assert!(control.max_in_flight() >= 2);
}

#[tokio::test(start_paused = true, flavor = "current_thread")]
async fn panicking_worker_is_reported_not_propagated() {
    let local = TempDir::new().expect("local");
    let store = MemoryObjectStore::new();
    deploy(&store, &[("a.py", "a"), ("b.py", "b")]);
    let control = ScriptedControlPlane::new(["a", "b"]);
    control.panic_on(Op::Pause, "a");

    let report = executor(&control, &store, &local, no_monitoring())
        .apply(&plan(&[("a", "a.py"), ("b", "b.py")], &[]))
        .await;

    assert_eq!(report.outcomes.len(), 2);
    match report.outcomes[0].error() {
        Some(ApplyError::Panicked(msg)) => assert!(msg.contains("scripted panic on a")),
        other => panic!("expected panic outcome, got {other:?}"),
    }
    assert!(report.outcomes[1].is_success());
}

#[tokio::test(start_paused = true, flavor = "current_thread")]
async fn cancellation_during_stop_skips_start() {
    let local = TempDir::new().expect("local");
    write_tree(local.path(), &[("a.py", "a")]);
    let store = MemoryObjectStore::new();
    deploy(&store, &[("c.py", "c")]);
    let control = ScriptedControlPlane::new(["c"]);
    control.fail_always(Op::Purge, "c");
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(7)).await;
        trigger.cancel();
    });

    let report = executor(&control, &store, &local, ApplyOptions::default())
        .with_cancellation(cancel)
        .apply(&plan(&[("c", "c.py")], &[("a", "a.py")]))
        .await;

    assert!(report.start_skipped);
    assert!(!report.is_success());
    assert!(matches!(report.outcomes[0].error(), Some(ApplyError::Cancelled)));
    assert_eq!(report.outcomes.len(), 1);
    assert!(report.monitoring.is_none());
    assert!(store.get("dags/a.py").is_none());
}

#[tokio::test(start_paused = true, flavor = "current_thread")]
async fn monitoring_failure_is_not_fatal() {
    let local = TempDir::new().expect("local");
    let store = MemoryObjectStore::new();
    let control = ScriptedControlPlane::new(Vec::<&str>::new());
    control.fail_always(Op::Unpause, "airflow_monitoring");

    let report = executor(&control, &store, &local, ApplyOptions::default())
        .apply(&plan(&[], &[]))
        .await;

    assert!(report.is_success());
    assert!(matches!(report.monitoring, Some(Err(_))));
    assert_eq!(control.count(Op::Unpause, "airflow_monitoring"), 1);
    let json = report.to_json();
    assert_eq!(json["monitoring"]["ok"], false);
}

#[tokio::test(start_paused = true, flavor = "current_thread")]
async fn custom_retry_policy_is_honoured() {
    let local = TempDir::new().expect("local");
    write_tree(local.path(), &[("a.py", "a")]);
    let store = MemoryObjectStore::new();
    let control = ScriptedControlPlane::new(Vec::<&str>::new());
    control.fail_times(Op::Unpause, "a", 1);

    let options = ApplyOptions {
        unpause_retry: RetryPolicy::fixed(2, Duration::from_secs(1)).with_jitter(0.5),
        ..no_monitoring()
    };
    let report = executor(&control, &store, &local, options)
        .apply(&plan(&[], &[("a", "a.py")]))
        .await;

    assert!(report.is_success());
    assert_eq!(control.count(Op::Unpause, "a"), 2);
    let json = report.to_json();
    assert_eq!(json["outcomes"][0]["dag"], "a");
    assert_eq!(json["outcomes"][0]["phase"], "start");
    assert_eq!(json["outcomes"][0]["ok"], true);
}
