//! Snapshot of the deployed DAG tree.
//!
//! One prefix listing becomes a [`ListedTree`]. Only `.airflowignore` files
//! are downloaded; everything else is known by key alone.

use dagger_core::{ObjectStore, RemoteRoot, StoreError};
use dagger_resolver::{ListedTree, IGNORE_FILE_NAME};

pub async fn snapshot(store: &dyn ObjectStore, root: &RemoteRoot) -> Result<ListedTree, StoreError> {
    let prefix = root.list_prefix();
    let keys = store.list(&prefix).await?;
    let rel_paths: Vec<String> = keys
        .iter()
        .filter_map(|key| key.strip_prefix(prefix.as_str()))
        .filter(|rel| !rel.is_empty())
        .map(str::to_owned)
        .collect();

    let mut tree = ListedTree::new(root.to_string(), &rel_paths);
    let ignore_files: Vec<String> = tree.files_named(IGNORE_FILE_NAME).collect();
    for rel in ignore_files {
        let key = format!("{prefix}{rel}");
        let bytes = store.download(&key).await?;
        tree.insert_contents(rel, String::from_utf8_lossy(&bytes).into_owned());
    }
    tracing::debug!(root = %root, objects = rel_paths.len(), "snapshotted remote tree");
    Ok(tree)
}
