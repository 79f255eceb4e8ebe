use std::future::Future;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use dagger_sync::{Reconciler, SyncRun};

use crate::error::{io_err, DaemonError};

/// Counters for a finished reconcile loop.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoopStats {
    pub runs: usize,
    /// Runs that errored before apply or had a failing DAG.
    pub failed: usize,
}

/// Install the global subscriber on stderr. Later calls are no-ops.
pub fn init_tracing(json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

/// Build a multi-thread runtime and block the current thread on `fut`.
pub fn block_on<F: Future>(fut: F) -> Result<F::Output, DaemonError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    Ok(runtime.block_on(fut))
}

/// Run the reconcile loop until Ctrl-C and block the current thread until it
/// exits.
pub fn start_blocking(
    reconciler: &Reconciler,
    dry_run: bool,
    json: bool,
) -> Result<LoopStats, DaemonError> {
    init_tracing(json);
    block_on(async {
        let shutdown = CancellationToken::new();
        let signals = spawn_signal_handler(shutdown.clone());
        let interval = reconciler.settings().interval;
        let stats = run_loop(reconciler, interval, dry_run, shutdown.clone()).await;
        shutdown.cancel();
        match signals.await {
            Ok(result) => result.map(|()| stats),
            Err(err) => Err(DaemonError::Signal(format!("signal task failed: {err}"))),
        }
    })?
}

/// Cancel `shutdown` on Ctrl-C. The task ends when either fires.
pub fn spawn_signal_handler(
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<Result<(), DaemonError>> {
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown.cancelled() => Ok(()),
            signal = tokio::signal::ctrl_c() => match signal {
                Ok(()) => {
                    tracing::info!("received ctrl-c, stopping reconcile loop");
                    shutdown.cancel();
                    Ok(())
                }
                Err(err) => Err(DaemonError::Signal(format!("ctrl-c handler failed: {err}"))),
            },
        }
    })
}

/// Reconcile every `interval`, starting immediately, until `shutdown` fires.
///
/// A failing run is logged and the loop carries on. Cancellation reaches the
/// in-flight run through a child token.
pub async fn run_loop(
    reconciler: &Reconciler,
    interval: Duration,
    dry_run: bool,
    shutdown: CancellationToken,
) -> LoopStats {
    let mut stats = LoopStats::default();
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        stats.runs += 1;
        match reconciler.run_once(dry_run, shutdown.child_token()).await {
            Ok(run) => {
                log_run(stats.runs, &run);
                if !run.is_success() {
                    stats.failed += 1;
                }
            }
            Err(err) => {
                stats.failed += 1;
                tracing::error!(run = stats.runs, error = %err, "reconcile failed");
            }
        }
    }

    tracing::info!(runs = stats.runs, failed = stats.failed, "reconcile loop stopped");
    stats
}

fn log_run(run_no: usize, run: &SyncRun) {
    let plan = &run.plan.plan;
    match &run.apply {
        Some(report) => tracing::info!(
            run = run_no,
            stopped = plan.to_stop.len(),
            started = plan.to_start.len(),
            drifted = plan.drifted.len(),
            failures = report.failures().count(),
            "reconcile finished"
        ),
        None => tracing::info!(
            run = run_no,
            to_stop = plan.to_stop.len(),
            to_start = plan.to_start.len(),
            drifted = plan.drifted.len(),
            "dry run finished"
        ),
    }
}
