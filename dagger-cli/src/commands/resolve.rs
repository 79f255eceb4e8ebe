//! `dagger resolve`: find the file behind each DAG id in a local tree.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use dagger_core::{DagId, DagSet, RelPath};
use dagger_resolver::{resolve_local, Defect, ResolveError};

use crate::commands::common::print_json;
use crate::Globals;

/// Arguments for `dagger resolve`.
#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Root of the DAG tree.
    pub tree: PathBuf,

    /// DAG ids to look up; a trailing `.py` is ignored.
    #[arg(required = true, num_args = 1..)]
    pub ids: Vec<String>,
}

#[derive(Serialize)]
struct ResolveJson {
    tree: String,
    matches: BTreeMap<DagId, RelPath>,
    defects: Vec<DefectJson>,
}

#[derive(Serialize)]
struct DefectJson {
    dag: DagId,
    kind: &'static str,
    paths: Vec<RelPath>,
}

impl From<&Defect> for DefectJson {
    fn from(defect: &Defect) -> Self {
        match defect {
            Defect::NotFound { dag } => Self {
                dag: dag.clone(),
                kind: "not_found",
                paths: Vec::new(),
            },
            Defect::Ambiguous { dag, paths } => Self {
                dag: dag.clone(),
                kind: "ambiguous",
                paths: paths.clone(),
            },
        }
    }
}

#[derive(Tabled)]
struct MatchRow {
    #[tabled(rename = "dag")]
    dag: String,
    #[tabled(rename = "path")]
    path: String,
}

impl ResolveArgs {
    pub fn run(self, globals: &Globals) -> Result<()> {
        let candidates: DagSet = self
            .ids
            .iter()
            .map(|id| DagId::from_file_name(id))
            .collect();
        let tree = self.tree.display().to_string();

        let (matches, defects) = match resolve_local(&self.tree, &candidates) {
            Ok(resolution) => (resolution.unique(), Vec::new()),
            Err(ResolveError::Defects(found)) => (found.partial.unique(), found.defects),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to resolve DAGs in {tree}"))
            }
        };

        if globals.json {
            print_json(&ResolveJson {
                tree,
                matches,
                defects: defects.iter().map(DefectJson::from).collect(),
            })?;
        } else {
            print_matches(&matches);
            for defect in &defects {
                println!("{} {defect}", "✗".red().bold());
            }
        }

        if !defects.is_empty() {
            bail!("{} DAG id(s) did not resolve to exactly one file", defects.len());
        }
        Ok(())
    }
}

fn print_matches(matches: &BTreeMap<DagId, RelPath>) {
    if matches.is_empty() {
        return;
    }
    let rows: Vec<MatchRow> = matches
        .iter()
        .map(|(dag, rel)| MatchRow {
            dag: dag.to_string(),
            path: rel.to_string(),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}
