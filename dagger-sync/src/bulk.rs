//! Support-folder upload (`plugins/`, `data/`).
//!
//! Every file under the local folder is copied to `<folder>/<rel>` at the
//! bucket root. Anything inside a `__pycache__` directory is skipped.

use std::path::{Path, PathBuf};

use dagger_core::{ObjectStore, RelPath, RemoteRoot};

use crate::error::{io_err, SyncError};

const PYCACHE: &str = "__pycache__";

/// Upload `local_dir` into the bucket folder `folder`. Returns the number of
/// files uploaded.
pub async fn upload_folder(
    store: &dyn ObjectStore,
    local_dir: &Path,
    folder: &str,
) -> Result<usize, SyncError> {
    let files = collect_files(local_dir)?;
    for (abs, rel) in &files {
        let key = RemoteRoot::sibling_key(folder, rel);
        if let Err(source) = store.upload(&key, abs).await {
            return Err(SyncError::Upload { key, source });
        }
    }
    tracing::info!(
        folder,
        local = %local_dir.display(),
        files = files.len(),
        "uploaded support folder"
    );
    Ok(files.len())
}

/// Files under `root` as (absolute path, `/`-joined relative path), sorted.
fn collect_files(root: &Path) -> Result<Vec<(PathBuf, RelPath)>, SyncError> {
    let mut files = Vec::new();
    let mut pending = vec![(root.to_path_buf(), String::new())];
    while let Some((dir, rel_dir)) = pending.pop() {
        for entry in std::fs::read_dir(&dir).map_err(|e| io_err(&dir, e))? {
            let entry = entry.map_err(|e| io_err(&dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == PYCACHE {
                continue;
            }
            let rel = if rel_dir.is_empty() {
                name
            } else {
                format!("{rel_dir}/{name}")
            };
            let path = entry.path();
            let file_type = entry.file_type().map_err(|e| io_err(&path, e))?;
            if file_type.is_dir() {
                pending.push((path, rel));
            } else if file_type.is_symlink() && path.is_dir() {
                tracing::debug!(path = %path.display(), "skipping symlinked directory");
            } else {
                files.push((path, RelPath::from(rel)));
            }
        }
    }
    files.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(files)
}
