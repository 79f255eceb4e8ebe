//! # dagger-resolver
//!
//! Resolves DAG ids to the single source file implementing each of them,
//! honouring `.airflowignore` files inherited down the tree.
//!
//! Call [`resolve`] with any [`FileTree`]: a [`LocalTree`] for the working
//! copy or a [`ListedTree`] rebuilt from a remote prefix listing. Each call
//! builds its own [`IgnoreIndex`]; indexes are never shared between trees.
//!
//! The walk is depth-first. Entering a directory first loads its ignore
//! file, then the directory itself is checked against its effective rules
//! and pruned on a match. Candidate files that survive every rule are
//! recorded. After the walk each candidate must have exactly one match;
//! every violation is collected into a single [`ResolveError::Defects`].

pub mod error;
pub mod ignore;
pub mod matcher;
pub mod tree;

use std::collections::BTreeMap;
use std::path::Path;

use dagger_core::{DagId, DagSet, RelPath};

pub use error::{Defect, ResolutionDefects, ResolveError};
pub use ignore::{IgnoreIndex, IgnoreRule, IGNORE_FILE_NAME};
pub use tree::{EntryKind, FileTree, ListedTree, LocalTree, TreeEntry};

use tree::join;

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// DAG id → paths matched in one tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    matches: BTreeMap<DagId, Vec<RelPath>>,
}

impl Resolution {
    pub fn get(&self, dag: &DagId) -> &[RelPath] {
        self.matches.get(dag).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DagId, &[RelPath])> {
        self.matches.iter().map(|(dag, paths)| (dag, paths.as_slice()))
    }

    /// Ids that matched exactly one path, with that path.
    pub fn unique(&self) -> BTreeMap<DagId, RelPath> {
        self.matches
            .iter()
            .filter_map(|(dag, paths)| match paths.as_slice() {
                [only] => Some((dag.clone(), only.clone())),
                _ => None,
            })
            .collect()
    }

    fn record(&mut self, dag: DagId, path: RelPath) {
        let paths = self.matches.entry(dag).or_default();
        if !paths.contains(&path) {
            paths.push(path);
        }
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Resolve every id in `candidates` to exactly one file in `tree`.
///
/// An empty candidate set returns immediately without touching the tree.
pub fn resolve<T>(tree: &T, candidates: &DagSet) -> Result<Resolution, ResolveError>
where
    T: FileTree + ?Sized,
{
    if candidates.is_empty() {
        return Ok(Resolution::default());
    }
    tracing::info!(
        tree = %tree.describe(),
        candidates = candidates.len(),
        "searching for DAG files"
    );

    let mut walker = Walker {
        tree,
        candidates,
        index: IgnoreIndex::new()?,
        resolution: Resolution::default(),
    };
    walker.walk_dir("")?;
    let resolution = walker.resolution;

    let defects = validate(&resolution, candidates);
    if defects.is_empty() {
        return Ok(resolution);
    }
    Err(ResolveError::Defects(ResolutionDefects {
        tree: tree.describe(),
        defects,
        partial: resolution,
    }))
}

/// [`resolve`] over a directory on the local filesystem.
pub fn resolve_local(root: &Path, candidates: &DagSet) -> Result<Resolution, ResolveError> {
    resolve(&LocalTree::new(root), candidates)
}

// ---------------------------------------------------------------------------
// Walk
// ---------------------------------------------------------------------------

struct Walker<'a, T: FileTree + ?Sized> {
    tree: &'a T,
    candidates: &'a DagSet,
    index: IgnoreIndex,
    resolution: Resolution,
}

impl<T: FileTree + ?Sized> Walker<'_, T> {
    fn walk_dir(&mut self, dir: &str) -> Result<(), ResolveError> {
        let entries = self.tree.list_dir(dir)?;

        let has_ignore_file = entries
            .iter()
            .any(|e| e.kind == EntryKind::File && e.name == IGNORE_FILE_NAME);
        if has_ignore_file {
            let path = join(dir, IGNORE_FILE_NAME);
            let contents = self.tree.read_to_string(&path)?;
            self.index.load(dir, &contents, &path)?;
        }

        if !dir.is_empty() {
            if let Some(rule) = self.index.first_match(dir, dir) {
                tracing::debug!(dir, rule = %rule.pattern, "ignoring directory");
                return Ok(());
            }
        }

        for entry in entries {
            let rel = join(dir, &entry.name);
            match entry.kind {
                EntryKind::Dir => self.walk_dir(&rel)?,
                EntryKind::File => self.visit_file(dir, &entry.name, rel),
            }
        }
        Ok(())
    }

    fn visit_file(&mut self, dir: &str, name: &str, rel: String) {
        if name == IGNORE_FILE_NAME {
            return;
        }
        let dag = DagId::from_file_name(name);
        if !self.candidates.contains(&dag) {
            return;
        }
        let rel = RelPath::from(rel);
        match self.index.first_match(rel.as_str(), dir) {
            Some(rule) => {
                tracing::debug!(path = %rel, rule = %rule.pattern, "ignoring file");
            }
            None => self.resolution.record(dag, rel),
        }
    }
}

fn validate(resolution: &Resolution, candidates: &DagSet) -> Vec<Defect> {
    candidates
        .iter()
        .filter_map(|dag| match resolution.get(dag) {
            [] => Some(Defect::NotFound { dag: dag.clone() }),
            [_] => None,
            paths => Some(Defect::Ambiguous {
                dag: dag.clone(),
                paths: paths.to_vec(),
            }),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
