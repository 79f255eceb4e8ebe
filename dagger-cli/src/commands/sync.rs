//! `dagger sync`: plan, then stop and start DAGs until the environment
//! matches the running list.

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};
use tokio_util::sync::CancellationToken;

use dagger_daemon::{block_on, init_tracing, spawn_signal_handler, start_blocking};
use dagger_sync::{ApplyReport, SyncRun};

use crate::commands::common::{print_json, EnvArgs, RunJson};
use crate::commands::plan::print_plan;
use crate::Globals;

/// Arguments for `dagger sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Plan only; skip uploads and control plane changes.
    #[arg(long)]
    pub dry_run: bool,

    /// Keep reconciling every `interval_secs` until Ctrl-C.
    #[arg(long = "loop")]
    pub repeat: bool,

    #[command(flatten)]
    pub env: EnvArgs,
}

impl SyncArgs {
    pub fn run(self, globals: &Globals) -> Result<()> {
        let reconciler = self.env.reconciler(globals)?;

        if self.repeat {
            let stats = start_blocking(&reconciler, self.dry_run, globals.json)
                .context("reconcile loop failed")?;
            if globals.json {
                print_json(&serde_json::json!({ "runs": stats.runs, "failed": stats.failed }))?;
            } else {
                println!("stopped after {} run(s), {} failed", stats.runs, stats.failed);
            }
            return Ok(());
        }

        init_tracing(globals.json);
        let dry_run = self.dry_run;
        let run = block_on(async {
            let cancel = CancellationToken::new();
            let signals = spawn_signal_handler(cancel.clone());
            let run = reconciler.run_once(dry_run, cancel.clone()).await;
            cancel.cancel();
            let _ = signals.await;
            run
        })?
        .context("reconcile failed")?;

        let environment = reconciler.settings().name.as_str();
        if globals.json {
            print_json(&RunJson::new(environment, &run))?;
        } else {
            print_run(environment, &run);
        }

        if !run.is_success() {
            let failed = run.apply.as_ref().map_or(0, |r| r.failures().count());
            bail!("sync finished with {failed} failed DAG(s)");
        }
        Ok(())
    }
}

#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "dag")]
    dag: String,
    #[tabled(rename = "phase")]
    phase: String,
    #[tabled(rename = "path")]
    path: String,
    #[tabled(rename = "result")]
    result: String,
}

fn print_run(environment: &str, run: &SyncRun) {
    print_plan(environment, &run.remote.to_string(), &run.plan);
    match &run.apply {
        Some(report) => print_report(report, run.support_files),
        None => println!("{}", "[dry-run] nothing applied".bright_black()),
    }
}

fn print_report(report: &ApplyReport, support_files: usize) {
    if support_files > 0 {
        println!("uploaded {support_files} support file(s)");
    }

    if !report.outcomes.is_empty() {
        let rows: Vec<OutcomeRow> = report
            .outcomes
            .iter()
            .map(|outcome| OutcomeRow {
                dag: outcome.dag.to_string(),
                phase: outcome.phase.to_string(),
                path: outcome.rel.to_string(),
                result: match &outcome.result {
                    Ok(()) => "ok".green().to_string(),
                    Err(err) => err.to_string().red().to_string(),
                },
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
    }

    for outcome in &report.outcomes {
        for warning in &outcome.warnings {
            println!("{} {}: {warning}", "warning".yellow().bold(), outcome.dag);
        }
    }

    if report.start_skipped {
        println!("{}", "start phase skipped: run was cancelled".yellow());
    }
    match &report.monitoring {
        Some(Err(err)) => println!(
            "{} monitoring DAG unpause failed: {err}",
            "warning".yellow().bold()
        ),
        Some(Ok(())) | None => {}
    }

    let failed = report.failures().count();
    let elapsed = report.finished_at - report.started_at;
    if failed == 0 && !report.start_skipped {
        println!(
            "{} {} DAG(s) in {}s",
            "✓ synced".green().bold(),
            report.outcomes.len(),
            elapsed.num_seconds()
        );
    } else {
        println!(
            "{} {failed} of {} DAG(s) failed",
            "✗".red().bold(),
            report.outcomes.len()
        );
    }
}
