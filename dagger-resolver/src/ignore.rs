//! `.airflowignore` parsing and the per-directory ignore index.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ResolveError;
use crate::matcher::{Matcher, MatcherCache};

/// Name of an ignore-declaration file.
pub const IGNORE_FILE_NAME: &str = ".airflowignore";

/// Comment marker inside an ignore file.
const COMMENT_MARKER: char = '#';

/// Built-in rule: anything with a `tmp` path segment is never a DAG source.
const IMPLICIT_TMP_RULE: &str = "(^|/)tmp(/|$)";

/// One rule, scoped to the directory whose ignore file declared it.
#[derive(Debug, Clone)]
pub struct IgnoreRule {
    /// Rule text re-expressed relative to the tree root.
    pub pattern: String,
    /// Declaring directory, relative to the tree root (`""` for the root).
    pub scope: String,
    matcher: Arc<Matcher>,
}

impl IgnoreRule {
    pub fn is_match(&self, rel_path: &str) -> bool {
        self.matcher.is_match(rel_path)
    }
}

/// Directory → rules declared directly in that directory.
#[derive(Debug)]
pub struct IgnoreIndex {
    by_dir: HashMap<String, Vec<IgnoreRule>>,
    implicit: IgnoreRule,
    cache: MatcherCache,
}

impl IgnoreIndex {
    pub fn new() -> Result<Self, ResolveError> {
        let mut cache = MatcherCache::new();
        let matcher = cache
            .get_or_compile(IMPLICIT_TMP_RULE)
            .map_err(|source| ResolveError::InvalidPattern {
                file: "<built-in>".to_owned(),
                pattern: IMPLICIT_TMP_RULE.to_owned(),
                source,
            })?;
        Ok(Self {
            by_dir: HashMap::new(),
            implicit: IgnoreRule {
                pattern: "tmp".to_owned(),
                scope: String::new(),
                matcher,
            },
            cache,
        })
    }

    /// Register the contents of `dir`'s ignore file. Returns the rule count.
    ///
    /// `source` names the file in error messages.
    pub fn load(&mut self, dir: &str, contents: &str, source: &str) -> Result<usize, ResolveError> {
        let mut rules = Vec::new();
        for line in parse_ignore_lines(contents) {
            let pattern = qualify(dir, &line);
            let matcher =
                self.cache
                    .get_or_compile(&pattern)
                    .map_err(|e| ResolveError::InvalidPattern {
                        file: source.to_owned(),
                        pattern: pattern.clone(),
                        source: e,
                    })?;
            rules.push(IgnoreRule {
                pattern,
                scope: dir.to_owned(),
                matcher,
            });
        }
        let count = rules.len();
        tracing::debug!(file = source, rules = count, "loaded ignore file");
        self.by_dir.insert(dir.to_owned(), rules);
        Ok(count)
    }

    /// Rules declared directly in `dir`.
    pub fn rules_in(&self, dir: &str) -> &[IgnoreRule] {
        self.by_dir.get(dir).map(Vec::as_slice).unwrap_or(&[])
    }

    /// First rule matching `rel_path` among its effective rules: the
    /// implicit rule, then `own_dir`'s rules, then every ancestor's up to the
    /// root.
    pub fn first_match(&self, rel_path: &str, own_dir: &str) -> Option<&IgnoreRule> {
        if self.implicit.is_match(rel_path) {
            return Some(&self.implicit);
        }
        scope_chain(own_dir)
            .flat_map(|dir| self.rules_in(dir).iter())
            .find(|rule| rule.is_match(rel_path))
    }
}

/// Strip comments and blank lines from ignore-file contents.
pub fn parse_ignore_lines(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(|line| match line.find(COMMENT_MARKER) {
            Some(idx) => &line[..idx],
            None => line,
        })
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .map(str::to_owned)
        .collect()
}

/// Prefix `pattern` with the directory that declared it.
pub fn qualify(dir: &str, pattern: &str) -> String {
    let pattern = pattern.trim_start_matches("./");
    if dir.is_empty() {
        pattern.to_owned()
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), pattern)
    }
}

/// `a/b/c` → `a/b/c`, `a/b`, `a`, `""`.
fn scope_chain(dir: &str) -> impl Iterator<Item = &str> {
    let mut next = Some(dir);
    std::iter::from_fn(move || {
        let current = next?;
        next = if current.is_empty() {
            None
        } else {
            Some(current.rsplit_once('/').map(|(parent, _)| parent).unwrap_or(""))
        };
        Some(current)
    })
}
