mod common;

use std::path::Path;
use std::sync::Arc;

use dagger_core::{DaggerConfig, EnvSettings, MemoryObjectStore};
use dagger_sync::Reconciler;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use common::{write_tree, ScriptedControlPlane};

fn settings(root: &Path) -> EnvSettings {
    write_tree(root, &[("running_dags.txt", "# nothing\n")]);
    std::fs::create_dir_all(root.join("dags")).expect("dags dir");
    DaggerConfig {
        name: Some("env".to_owned()),
        project: Some("proj".to_owned()),
        location: Some("europe-west1".to_owned()),
        dags_dir: Some(root.join("dags")),
        running_dags: Some(root.join("running_dags.txt")),
        plugins_dir: Some(root.join("plugins")),
        data_dir: Some(root.join("data")),
        bucket_dir: Some(root.join("bucket")),
        dag_prefix: Some("gs://bucket/dags".to_owned()),
        ..DaggerConfig::default()
    }
    .validate()
    .expect("settings")
}

#[tokio::test]
async fn absent_support_folder_is_skipped() {
    let dir = TempDir::new().expect("tempdir");
    write_tree(dir.path(), &[("plugins/hooks/http.py", "hook")]);
    let store = MemoryObjectStore::new();
    let reconciler = Reconciler::new(
        Arc::new(ScriptedControlPlane::new(Vec::<&str>::new())),
        Arc::new(store.clone()),
        settings(dir.path()),
    );

    let run = reconciler
        .run_once(false, CancellationToken::new())
        .await
        .expect("run");

    assert_eq!(run.support_files, 1);
    assert_eq!(store.keys(), vec!["plugins/hooks/http.py"]);
}

#[tokio::test]
async fn dry_run_uploads_nothing() {
    let dir = TempDir::new().expect("tempdir");
    write_tree(dir.path(), &[("plugins/hooks/http.py", "hook"), ("data/seed.csv", "1")]);
    let store = MemoryObjectStore::new();
    let reconciler = Reconciler::new(
        Arc::new(ScriptedControlPlane::new(Vec::<&str>::new())),
        Arc::new(store.clone()),
        settings(dir.path()),
    );

    let run = reconciler
        .run_once(true, CancellationToken::new())
        .await
        .expect("run");

    assert_eq!(run.support_files, 0);
    assert!(run.apply.is_none());
    assert!(store.keys().is_empty());
}
