//! Compiled ignore-rule matchers.
//!
//! A rule is compiled once, when its ignore file is parsed, into one of two
//! forms:
//!
//! - **Glob**: any rule containing `**`. Matched in full against the path
//!   placed under [`GLOB_BASE`], with `**` crossing directory separators and
//!   `*`/`?` staying within one segment.
//! - **Regex**: everything else. Searched (unanchored) in the path relative
//!   to the tree root.

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;

/// Token that switches a rule from regex to glob semantics.
pub const RECURSIVE_WILDCARD: &str = "**";

/// Common absolute base both glob and path are placed under before matching.
pub const GLOB_BASE: &str = "/";

#[derive(Debug, Clone)]
pub enum Matcher {
    Glob { pattern: String, regex: Regex },
    Regex { pattern: String, regex: Regex },
}

impl Matcher {
    /// Compile `rule`, picking glob or regex semantics from its text.
    pub fn compile(rule: &str) -> Result<Self, regex::Error> {
        if rule.contains(RECURSIVE_WILDCARD) {
            let anchored = format!("{GLOB_BASE}{}", rule.trim_start_matches('/'));
            Ok(Matcher::Glob {
                pattern: rule.to_owned(),
                regex: Regex::new(&glob_to_regex(&anchored))?,
            })
        } else {
            Ok(Matcher::Regex {
                pattern: rule.to_owned(),
                regex: Regex::new(rule)?,
            })
        }
    }

    /// Test a `/`-separated path relative to the tree root.
    pub fn is_match(&self, rel_path: &str) -> bool {
        match self {
            Matcher::Glob { regex, .. } => regex.is_match(&format!("{GLOB_BASE}{rel_path}")),
            Matcher::Regex { regex, .. } => regex.is_match(rel_path),
        }
    }

    pub fn pattern(&self) -> &str {
        match self {
            Matcher::Glob { pattern, .. } | Matcher::Regex { pattern, .. } => pattern,
        }
    }

    pub fn is_glob(&self) -> bool {
        matches!(self, Matcher::Glob { .. })
    }
}

/// Translate a doublestar glob into an anchored regular expression.
///
/// Supported syntax: `**`, `*`, `?`, `[...]` / `[!...]`, `{a,b}` and `\`
/// escapes. A `**/` segment matches zero or more directories and a trailing
/// `/**` also matches the directory itself.
pub fn glob_to_regex(glob: &str) -> String {
    let chars: Vec<char> = glob.chars().collect();
    let mut out = String::with_capacity(glob.len() * 2 + 2);
    out.push('^');
    let mut brace_depth = 0usize;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '*' if chars.get(i + 1) == Some(&'*') => {
                let at_segment_start = i == 0 || chars[i - 1] == '/';
                let followed_by_slash = chars.get(i + 2) == Some(&'/');
                let at_end = i + 2 == chars.len();
                if at_segment_start && followed_by_slash {
                    out.push_str("(?:.*/)?");
                    i += 3;
                } else if at_segment_start && at_end && out.ends_with('/') {
                    // `dir/**` matches `dir` itself and everything below it.
                    out.pop();
                    out.push_str("(?:/.*)?");
                    i += 2;
                } else {
                    out.push_str(".*");
                    i += 2;
                }
                continue;
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            '[' => match chars[i + 1..].iter().position(|&ch| ch == ']') {
                Some(offset) if offset > 0 => {
                    let body: String = chars[i + 1..i + 1 + offset].iter().collect();
                    out.push('[');
                    match body.strip_prefix('!') {
                        Some(rest) => {
                            out.push('^');
                            out.push_str(&escape_class(rest));
                        }
                        None => out.push_str(&escape_class(&body)),
                    }
                    out.push(']');
                    i += offset + 2;
                    continue;
                }
                _ => out.push_str(r"\["),
            },
            '{' => {
                brace_depth += 1;
                out.push_str("(?:");
            }
            '}' if brace_depth > 0 => {
                brace_depth -= 1;
                out.push(')');
            }
            ',' if brace_depth > 0 => out.push('|'),
            '\\' => {
                if let Some(next) = chars.get(i + 1) {
                    out.push_str(&regex::escape(&next.to_string()));
                    i += 2;
                    continue;
                }
                out.push_str(r"\\");
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
        i += 1;
    }
    // Unbalanced `{` is taken literally by closing the open groups.
    for _ in 0..brace_depth {
        out.push(')');
    }
    out.push('$');
    out
}

fn escape_class(body: &str) -> String {
    body.replace('\\', r"\\").replace('[', r"\[")
}

// ---------------------------------------------------------------------------
// Memoisation
// ---------------------------------------------------------------------------

/// Per-index cache so a rule text repeated across ignore files is compiled
/// only once.
#[derive(Debug, Default)]
pub struct MatcherCache {
    compiled: HashMap<String, Arc<Matcher>>,
}

impl MatcherCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_compile(&mut self, rule: &str) -> Result<Arc<Matcher>, regex::Error> {
        if let Some(hit) = self.compiled.get(rule) {
            return Ok(Arc::clone(hit));
        }
        let matcher = Arc::new(Matcher::compile(rule)?);
        self.compiled.insert(rule.to_owned(), Arc::clone(&matcher));
        Ok(matcher)
    }

    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
