//! `dagger plan`: the dry-run view of a sync.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};
use tokio_util::sync::CancellationToken;

use dagger_core::DagSet;
use dagger_daemon::{block_on, init_tracing};
use dagger_sync::PlanReport;

use crate::commands::common::{print_json, EnvArgs, RunJson};
use crate::Globals;

/// Arguments for `dagger plan`.
#[derive(Args, Debug)]
pub struct PlanArgs {
    #[command(flatten)]
    pub env: EnvArgs,
}

impl PlanArgs {
    pub fn run(self, globals: &Globals) -> Result<()> {
        let reconciler = self.env.reconciler(globals)?;
        init_tracing(globals.json);
        let run = block_on(reconciler.run_once(true, CancellationToken::new()))?
            .context("planning failed")?;

        let environment = reconciler.settings().name.as_str();
        if globals.json {
            return print_json(&RunJson::new(environment, &run));
        }
        print_plan(environment, &run.remote.to_string(), &run.plan);
        Ok(())
    }
}

#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "action")]
    action: String,
    #[tabled(rename = "dag")]
    dag: String,
    #[tabled(rename = "path")]
    path: String,
}

pub(crate) fn print_plan(environment: &str, remote: &str, report: &PlanReport) {
    println!("{} {}", environment.bold(), remote.bright_black());
    println!("  stop:  {}", join(&report.raw.to_stop));
    println!("  start: {}", join(&report.raw.to_start));
    println!("  same:  {}", join(&report.raw.same));
    if !report.plan.drifted.is_empty() {
        println!(
            "  {} {}",
            "drifted:".yellow().bold(),
            join(&report.plan.drifted)
        );
    }

    if report.plan.is_empty() {
        println!("{}", "✓ nothing to do".green());
        return;
    }

    let stops = report.plan.to_stop.iter().map(|(dag, rel)| PlanRow {
        action: "stop".red().to_string(),
        dag: dag.to_string(),
        path: rel.to_string(),
    });
    let starts = report.plan.to_start.iter().map(|(dag, rel)| PlanRow {
        action: "start".green().to_string(),
        dag: dag.to_string(),
        path: rel.to_string(),
    });
    let mut table = Table::new(stops.chain(starts).collect::<Vec<_>>());
    table.with(Style::rounded());
    println!("{table}");
}

fn join(set: &DagSet) -> String {
    if set.is_empty() {
        return "-".to_owned();
    }
    set.iter().map(|id| id.as_str()).collect::<Vec<_>>().join(", ")
}
