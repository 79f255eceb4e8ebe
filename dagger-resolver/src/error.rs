//! Error types for dagger-resolver.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use dagger_core::{DagId, RelPath};

use crate::Resolution;

/// All errors that can arise from resolving DAG ids to files.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The tree (or a directory inside it) could not be read.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A listed tree was asked for a file whose contents it does not hold.
    #[error("contents of {path} were not provided to the listed tree")]
    MissingContents { path: String },

    #[error("invalid ignore pattern '{pattern}' in {file}: {source}")]
    InvalidPattern {
        file: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Zero or several files for one or more ids. Carries every defect plus
    /// whatever did resolve.
    #[error("{0}")]
    Defects(ResolutionDefects),
}

/// One id that did not resolve to exactly one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Defect {
    NotFound { dag: DagId },
    Ambiguous { dag: DagId, paths: Vec<RelPath> },
}

impl Defect {
    pub fn dag(&self) -> &DagId {
        match self {
            Defect::NotFound { dag } | Defect::Ambiguous { dag, .. } => dag,
        }
    }
}

impl fmt::Display for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Defect::NotFound { dag } => write!(f, "no file found for {dag}"),
            Defect::Ambiguous { dag, paths } => {
                let joined = paths
                    .iter()
                    .map(RelPath::as_str)
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "ambiguous file for {dag}: [{joined}]")
            }
        }
    }
}

/// Aggregate of every [`Defect`] found in one resolve pass.
#[derive(Debug, Clone)]
pub struct ResolutionDefects {
    pub tree: String,
    pub defects: Vec<Defect>,
    /// Matches recorded before validation, including the defective ones.
    pub partial: Resolution,
}

impl ResolutionDefects {
    pub fn dags(&self) -> impl Iterator<Item = &DagId> {
        self.defects.iter().map(Defect::dag)
    }
}

impl fmt::Display for ResolutionDefects {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "encountered {} error(s) matching files to DAGs in {}: ",
            self.defects.len(),
            self.tree
        )?;
        for (i, defect) in self.defects.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{defect}")?;
        }
        Ok(())
    }
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ResolveError {
    ResolveError::Io {
        path: path.into(),
        source,
    }
}
