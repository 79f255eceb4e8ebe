//! [`ControlPlane`] backed by the `gcloud` CLI.
//!
//! Airflow commands go through
//! `gcloud beta composer environments run <name> --location=<loc> <sub> -- <args>`;
//! the DAG prefix comes from `gcloud composer environments describe`.

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use dagger_core::{ControlError, ControlPlane, DagId, DagSet, EnvSettings};

pub const GCLOUD: &str = "gcloud";

#[derive(Debug, Clone)]
pub struct GcloudControlPlane {
    program: String,
    name: String,
    location: String,
    project: Option<String>,
    monitoring_dag: DagId,
}

impl GcloudControlPlane {
    pub fn new(name: impl Into<String>, location: impl Into<String>, monitoring_dag: DagId) -> Self {
        Self {
            program: GCLOUD.to_owned(),
            name: name.into(),
            location: location.into(),
            project: None,
            monitoring_dag,
        }
    }

    pub fn from_settings(settings: &EnvSettings) -> Self {
        Self::new(
            settings.name.clone(),
            settings.location.clone(),
            settings.monitoring_dag.clone(),
        )
        .with_project(settings.project.clone())
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    /// Run a different executable in place of `gcloud`.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Arguments for an Airflow sub-command run inside the environment.
    pub fn run_args(&self, sub: &str, args: &[&str]) -> Vec<String> {
        let mut out: Vec<String> = ["beta", "composer", "environments", "run"]
            .iter()
            .map(|s| (*s).to_owned())
            .collect();
        out.push(self.name.clone());
        out.push(format!("--location={}", self.location));
        if let Some(project) = &self.project {
            out.push(format!("--project={project}"));
        }
        out.push(sub.to_owned());
        if !args.is_empty() {
            out.push("--".to_owned());
            out.extend(args.iter().map(|a| (*a).to_owned()));
        }
        out
    }

    pub fn describe_args(&self) -> Vec<String> {
        let mut out: Vec<String> = ["composer", "environments", "describe"]
            .iter()
            .map(|s| (*s).to_owned())
            .collect();
        out.push(self.name.clone());
        out.push(format!("--location={}", self.location));
        if let Some(project) = &self.project {
            out.push(format!("--project={project}"));
        }
        out
    }

    async fn exec(&self, args: Vec<String>) -> Result<String, ControlError> {
        let command = format!("{} {}", self.program, args.join(" "));
        tracing::debug!(%command, "running");
        let output = Command::new(&self.program)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ControlError::Spawn {
                command: command.clone(),
                source,
            })?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            let combined = format!("{stdout}{stderr}");
            return Err(ControlError::Command {
                command,
                output: combined.trim().to_owned(),
            });
        }
        if !stderr.trim().is_empty() {
            tracing::debug!(%command, stderr = %stderr.trim(), "command wrote to stderr");
        }
        Ok(stdout)
    }

    async fn airflow(&self, sub: &str, args: &[&str]) -> Result<String, ControlError> {
        self.exec(self.run_args(sub, args)).await
    }
}

#[async_trait]
impl ControlPlane for GcloudControlPlane {
    async fn list_running(&self) -> Result<DagSet, ControlError> {
        let out = self.airflow("dags", &["list"]).await?;
        let running = parse_list_output(&out, &self.monitoring_dag)?;
        tracing::info!(count = running.len(), "listed running DAGs");
        Ok(running)
    }

    async fn pause(&self, dag: &DagId) -> Result<String, ControlError> {
        self.airflow("pause", &[dag.as_str()]).await
    }

    async fn unpause(&self, dag: &DagId) -> Result<String, ControlError> {
        self.airflow("unpause", &[dag.as_str()]).await
    }

    async fn purge_metadata(&self, dag: &DagId) -> Result<String, ControlError> {
        self.airflow("delete_dag", &[dag.as_str()]).await
    }

    async fn describe(&self) -> Result<String, ControlError> {
        let out = self.exec(self.describe_args()).await?;
        parse_describe(&out)
    }
}

// ---------------------------------------------------------------------------
// Output parsing
// ---------------------------------------------------------------------------

/// DAG ids from `dags list` output: every non-blank line after the second
/// separator line, minus the monitoring DAG.
pub fn parse_list_output(out: &str, monitoring: &DagId) -> Result<DagSet, ControlError> {
    let mut lines = out.lines().map(str::trim);
    let mut separators = 0;
    for line in lines.by_ref() {
        if is_separator(line) {
            separators += 1;
            if separators == 2 {
                break;
            }
        }
    }
    if separators < 2 {
        return Err(ControlError::Parse(format!(
            "DAG list output did not contain two separator lines: {}",
            out.trim()
        )));
    }
    Ok(lines
        .filter(|line| !line.is_empty() && *line != monitoring.as_str())
        .map(DagId::from)
        .collect())
}

fn is_separator(line: &str) -> bool {
    line.len() >= 3 && line.bytes().all(|b| b == b'-')
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Describe {
    config: DescribeConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeConfig {
    dag_gcs_prefix: String,
}

/// `config.dagGcsPrefix` from `environments describe` YAML.
pub fn parse_describe(out: &str) -> Result<String, ControlError> {
    let parsed: Describe = serde_yaml::from_str(out)
        .map_err(|e| ControlError::Parse(format!("environment description: {e}")))?;
    Ok(parsed.config.dag_gcs_prefix)
}
