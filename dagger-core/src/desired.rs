//! Desired-set declaration: a newline-delimited list of DAG ids.
//!
//! ```text
//! # running_dags.txt
//! etl_daily
//! reports_weekly.py   # the .py suffix is tolerated
//! ```

use std::path::Path;

use crate::error::DesiredSetError;
use crate::types::{DagId, DagSet};

/// Read the set of DAGs that should be running.
///
/// Lines are trimmed; blank lines and `#` comments are skipped, and a
/// trailing `.py` is stripped so file names and ids can be mixed.
pub fn read_desired_set(path: &Path) -> Result<DagSet, DesiredSetError> {
    let contents = std::fs::read_to_string(path).map_err(|e| DesiredSetError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let set = parse_desired_set(&contents);
    tracing::info!(path = %path.display(), count = set.len(), "read desired DAGs");
    Ok(set)
}

/// Parse the desired list from its textual contents.
pub fn parse_desired_set(contents: &str) -> DagSet {
    contents
        .lines()
        .map(|line| match line.find('#') {
            Some(idx) => &line[..idx],
            None => line,
        })
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(DagId::from_file_name)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::dag_set;
    use tempfile::TempDir;

    #[test]
    fn parses_ids_skipping_blanks_and_comments() {
        let set = parse_desired_set("a\n\n  b  \n# c\nd.py # trailing\n");
        assert_eq!(set, dag_set(["a", "b", "d"]));
    }

    #[test]
    fn duplicates_collapse() {
        let set = parse_desired_set("a\na\na.py\n");
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn missing_file_reports_path() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("running_dags.txt");
        let err = read_desired_set(&path).unwrap_err();
        assert!(err.to_string().contains("running_dags.txt"));
    }

    #[test]
    fn reads_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("running_dags.txt");
        std::fs::write(&path, "x\r\ny\n").unwrap();
        assert_eq!(read_desired_set(&path).unwrap(), dag_set(["x", "y"]));
    }
}
