//! File trees the resolver can walk.
//!
//! [`LocalTree`] reads the filesystem directly. [`ListedTree`] is rebuilt
//! from a flat list of object keys, as returned by a prefix listing, plus
//! the contents of whichever ignore files the caller downloaded.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use crate::error::{io_err, ResolveError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EntryKind {
    Dir,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub name: String,
    pub kind: EntryKind,
}

/// A read-only tree addressed by `/`-separated paths relative to its root.
pub trait FileTree {
    /// Human-readable root, used in logs and error messages.
    fn describe(&self) -> String;

    /// Entries of `dir` (`""` is the root), sorted by name.
    fn list_dir(&self, dir: &str) -> Result<Vec<TreeEntry>, ResolveError>;

    fn read_to_string(&self, path: &str) -> Result<String, ResolveError>;
}

/// Join a directory and a name into a root-relative path.
pub fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_owned()
    } else {
        format!("{dir}/{name}")
    }
}

// ---------------------------------------------------------------------------
// Local filesystem
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LocalTree {
    root: PathBuf,
}

impl LocalTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn absolute(&self, rel: &str) -> PathBuf {
        rel.split('/')
            .filter(|seg| !seg.is_empty())
            .fold(self.root.clone(), |acc, seg| acc.join(seg))
    }
}

impl FileTree for LocalTree {
    fn describe(&self) -> String {
        self.root.display().to_string()
    }

    fn list_dir(&self, dir: &str) -> Result<Vec<TreeEntry>, ResolveError> {
        let path = self.absolute(dir);
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(&path).map_err(|e| io_err(&path, e))? {
            let entry = entry.map_err(|e| io_err(&path, e))?;
            let file_type = entry.file_type().map_err(|e| io_err(entry.path(), e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            // Symlinked directories are not descended into.
            if file_type.is_symlink() && entry.path().is_dir() {
                tracing::debug!(dir, name = %name, "skipping symlinked directory");
                continue;
            }
            entries.push(TreeEntry {
                name,
                kind: if file_type.is_dir() {
                    EntryKind::Dir
                } else {
                    EntryKind::File
                },
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn read_to_string(&self, path: &str) -> Result<String, ResolveError> {
        let abs = self.absolute(path);
        std::fs::read_to_string(&abs).map_err(|e| io_err(&abs, e))
    }
}

// ---------------------------------------------------------------------------
// Listed (object-store) tree
// ---------------------------------------------------------------------------

/// Directory structure rebuilt from a flat key listing.
#[derive(Debug, Clone, Default)]
pub struct ListedTree {
    label: String,
    dirs: BTreeMap<String, BTreeMap<String, EntryKind>>,
    contents: HashMap<String, String>,
}

impl ListedTree {
    /// Build from root-relative file paths.
    pub fn new<I, S>(label: impl Into<String>, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut dirs: BTreeMap<String, BTreeMap<String, EntryKind>> = BTreeMap::new();
        dirs.insert(String::new(), BTreeMap::new());
        for path in paths {
            let path = path.as_ref().trim_matches('/');
            if path.is_empty() {
                continue;
            }
            let mut parent = String::new();
            let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
            for (i, seg) in segments.iter().enumerate() {
                let is_last = i + 1 == segments.len();
                let kind = if is_last { EntryKind::File } else { EntryKind::Dir };
                let children = dirs.entry(parent.clone()).or_default();
                // A name seen as a directory stays one.
                children
                    .entry((*seg).to_owned())
                    .and_modify(|k| {
                        if kind == EntryKind::Dir {
                            *k = EntryKind::Dir;
                        }
                    })
                    .or_insert(kind);
                parent = join(&parent, seg);
                if !is_last {
                    dirs.entry(parent.clone()).or_default();
                }
            }
        }
        Self {
            label: label.into(),
            dirs,
            contents: HashMap::new(),
        }
    }

    /// Provide the contents of a file (normally an ignore file).
    pub fn with_contents(mut self, path: impl Into<String>, contents: impl Into<String>) -> Self {
        self.insert_contents(path, contents);
        self
    }

    pub fn insert_contents(&mut self, path: impl Into<String>, contents: impl Into<String>) {
        self.contents.insert(path.into(), contents.into());
    }

    /// Every listed file path whose base name is `name`.
    pub fn files_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = String> + 'a {
        self.dirs.iter().flat_map(move |(dir, children)| {
            children
                .iter()
                .filter(move |(child, kind)| **kind == EntryKind::File && child.as_str() == name)
                .map(move |(child, _)| join(dir, child))
        })
    }
}

impl FileTree for ListedTree {
    fn describe(&self) -> String {
        self.label.clone()
    }

    fn list_dir(&self, dir: &str) -> Result<Vec<TreeEntry>, ResolveError> {
        let children = self.dirs.get(dir).ok_or_else(|| {
            io_err(
                join(&self.label, dir),
                std::io::Error::from(std::io::ErrorKind::NotFound),
            )
        })?;
        Ok(children
            .iter()
            .map(|(name, kind)| TreeEntry {
                name: name.clone(),
                kind: *kind,
            })
            .collect())
    }

    fn read_to_string(&self, path: &str) -> Result<String, ResolveError> {
        self.contents
            .get(path)
            .cloned()
            .ok_or_else(|| ResolveError::MissingContents {
                path: path.to_owned(),
            })
    }
}
