//! Dagger: keep a Cloud Composer environment's DAGs in line with a
//! declared running list.
//!
//! # Usage
//!
//! ```text
//! dagger sync [--dry-run] [--loop] [environment flags]
//! dagger plan [environment flags]
//! dagger resolve <tree> <dag-id>...
//! ```
//!
//! Every command accepts `--config <file>` and `--json`.

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{plan::PlanArgs, resolve::ResolveArgs, sync::SyncArgs};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "dagger",
    version,
    about = "Reconcile Cloud Composer DAGs against a declared running list",
    long_about = None,
)]
struct Cli {
    /// Config file to read instead of `~/.dagger/config.yaml`.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Emit machine-readable JSON (logs included).
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Plan and apply: stop retired or drifted DAGs, start new ones.
    Sync(SyncArgs),

    /// Show what `sync` would do without touching the environment.
    Plan(PlanArgs),

    /// Resolve DAG ids to files in a local tree.
    Resolve(ResolveArgs),
}

/// Flags shared by every command.
#[derive(Debug, Clone)]
pub struct Globals {
    pub config: Option<PathBuf>,
    pub json: bool,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    let globals = Globals {
        config: cli.config,
        json: cli.json,
    };
    match cli.command {
        Commands::Sync(args) => args.run(&globals),
        Commands::Plan(args) => args.run(&globals),
        Commands::Resolve(args) => args.run(&globals),
    }
}
