//! Config loading and collaborator wiring shared by `sync` and `plan`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use dagger_core::{config, DaggerConfig, EnvSettings, FsObjectStore};
use dagger_daemon::GcloudControlPlane;
use dagger_sync::{Reconciler, SyncRun};

use crate::Globals;

/// Environment flags; each one overrides the matching config key.
#[derive(Args, Debug, Clone, Default)]
pub struct EnvArgs {
    /// Composer environment name.
    #[arg(long)]
    pub name: Option<String>,

    #[arg(long)]
    pub project: Option<String>,

    #[arg(long)]
    pub location: Option<String>,

    /// Local DAG tree.
    #[arg(long, value_name = "DIR")]
    pub dags_dir: Option<PathBuf>,

    /// File listing the DAGs that should be running.
    #[arg(long, value_name = "FILE")]
    pub running_dags: Option<PathBuf>,

    #[arg(long, value_name = "DIR")]
    pub plugins_dir: Option<PathBuf>,

    #[arg(long, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Local mount of the environment bucket.
    #[arg(long, value_name = "DIR")]
    pub bucket_dir: Option<PathBuf>,

    /// `gs://<bucket>/<prefix>`; skips asking the environment.
    #[arg(long)]
    pub dag_prefix: Option<String>,

    /// Max concurrent DAG workers per phase (0 = unbounded).
    #[arg(long)]
    pub concurrency: Option<usize>,

    #[arg(long, value_name = "SECS")]
    pub call_timeout_secs: Option<u64>,

    #[arg(long, value_name = "SECS")]
    pub interval_secs: Option<u64>,

    #[arg(long)]
    pub monitoring_dag: Option<String>,

    /// gcloud executable to run.
    #[arg(long, value_name = "PATH", default_value = dagger_daemon::composer::GCLOUD)]
    pub gcloud: String,
}

impl EnvArgs {
    fn overrides(&self) -> DaggerConfig {
        DaggerConfig {
            name: self.name.clone(),
            project: self.project.clone(),
            location: self.location.clone(),
            dags_dir: self.dags_dir.clone(),
            running_dags: self.running_dags.clone(),
            plugins_dir: self.plugins_dir.clone(),
            data_dir: self.data_dir.clone(),
            bucket_dir: self.bucket_dir.clone(),
            dag_prefix: self.dag_prefix.clone(),
            concurrency: self.concurrency,
            call_timeout_secs: self.call_timeout_secs,
            interval_secs: self.interval_secs,
            monitoring_dag: self.monitoring_dag.clone(),
        }
    }

    /// Config file merged with flags, then validated.
    pub fn settings(&self, globals: &Globals) -> Result<EnvSettings> {
        let file = match &globals.config {
            Some(path) => config::load_file(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => config::load().context("failed to load ~/.dagger/config.yaml")?,
        };
        file.merge(self.overrides())
            .validate()
            .context("invalid environment settings")
    }

    /// A reconciler over the gcloud CLI and the mounted bucket.
    pub fn reconciler(&self, globals: &Globals) -> Result<Reconciler> {
        let settings = self.settings(globals)?;
        let control = GcloudControlPlane::from_settings(&settings).with_program(self.gcloud.clone());
        let store = FsObjectStore::new(settings.bucket_dir.clone());
        Ok(Reconciler::new(Arc::new(control), Arc::new(store), settings))
    }
}

// ---------------------------------------------------------------------------
// JSON payloads
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct RunJson<'a> {
    pub environment: &'a str,
    pub remote: String,
    pub raw: &'a dagger_sync::RawDiff,
    pub plan: &'a dagger_core::ReconciliationPlan,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apply: Option<serde_json::Value>,
    pub support_files: usize,
}

impl<'a> RunJson<'a> {
    pub fn new(environment: &'a str, run: &'a SyncRun) -> Self {
        Self {
            environment,
            remote: run.remote.to_string(),
            raw: &run.plan.raw,
            plan: &run.plan.plan,
            apply: run.apply.as_ref().map(|report| report.to_json()),
            support_files: run.support_files,
        }
    }
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("failed to encode JSON output")?;
    println!("{text}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn globals(config: Option<PathBuf>) -> Globals {
        Globals {
            config,
            json: false,
        }
    }

    #[test]
    fn flags_override_config_file() {
        let mut file = tempfile::NamedTempFile::new().expect("config file");
        writeln!(
            file,
            "name: from-file\nproject: p\nlocation: europe-west1\nbucket_dir: /mnt/bucket\nconcurrency: 4"
        )
        .expect("write config");

        let args = EnvArgs {
            name: Some("from-flag".to_owned()),
            concurrency: Some(0),
            ..EnvArgs::default()
        };
        let settings = args
            .settings(&globals(Some(file.path().to_path_buf())))
            .expect("settings");
        assert_eq!(settings.name, "from-flag");
        assert_eq!(settings.location, "europe-west1");
        assert_eq!(settings.concurrency, None);
    }

    #[test]
    fn missing_explicit_config_is_an_error() {
        let err = EnvArgs::default()
            .settings(&globals(Some(PathBuf::from("/definitely/not/here.yaml"))))
            .unwrap_err();
        assert!(format!("{err:#}").contains("failed to load config"));
    }
}
