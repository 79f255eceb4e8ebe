#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use dagger_core::{ControlError, ControlPlane, DagId, DagSet, MemoryObjectStore, RemoteRoot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Pause,
    Unpause,
    Purge,
}

#[derive(Debug, Default)]
struct Script {
    running: DagSet,
    remaining_failures: HashMap<(Op, DagId), u32>,
    panics: HashSet<(Op, DagId)>,
    calls: Vec<(Op, DagId)>,
}

/// Control plane fake: keeps a running set, fails or panics on request and
/// records every call.
#[derive(Debug, Clone)]
pub struct ScriptedControlPlane {
    prefix: String,
    script: Arc<Mutex<Script>>,
    delay: Option<Duration>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl ScriptedControlPlane {
    pub fn new<I, S>(running: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<DagId>,
    {
        let script = Script {
            running: running.into_iter().map(Into::into).collect(),
            ..Script::default()
        };
        Self {
            prefix: "gs://bucket/dags".to_owned(),
            script: Arc::new(Mutex::new(script)),
            delay: None,
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Every call sleeps this long (in tokio time) before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fail_times(&self, op: Op, dag: &str, times: u32) {
        self.lock()
            .remaining_failures
            .insert((op, DagId::from(dag)), times);
    }

    pub fn fail_always(&self, op: Op, dag: &str) {
        self.fail_times(op, dag, u32::MAX);
    }

    pub fn panic_on(&self, op: Op, dag: &str) {
        self.lock().panics.insert((op, DagId::from(dag)));
    }

    pub fn calls(&self) -> Vec<(Op, DagId)> {
        self.lock().calls.clone()
    }

    pub fn calls_for(&self, dag: &str) -> Vec<Op> {
        self.lock()
            .calls
            .iter()
            .filter(|(_, d)| d.as_str() == dag)
            .map(|(op, _)| *op)
            .collect()
    }

    pub fn count(&self, op: Op, dag: &str) -> usize {
        self.calls_for(dag).into_iter().filter(|o| *o == op).count()
    }

    pub fn running(&self) -> DagSet {
        self.lock().running.clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn call(&self, op: Op, dag: &DagId) -> Result<String, ControlError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let should_panic = {
            let mut script = self.lock();
            script.calls.push((op, dag.clone()));
            script.panics.contains(&(op, dag.clone()))
        };
        if should_panic {
            panic!("scripted panic on {dag}");
        }

        let mut script = self.lock();
        if let Some(left) = script.remaining_failures.get_mut(&(op, dag.clone())) {
            if *left > 0 {
                *left -= 1;
                return Err(ControlError::Command {
                    command: format!("{op:?} {dag}"),
                    output: "scripted failure".to_owned(),
                });
            }
        }
        match op {
            Op::Unpause => {
                script.running.insert(dag.clone());
            }
            Op::Purge => {
                script.running.remove(dag);
            }
            Op::Pause => {}
        }
        Ok(format!("{op:?} {dag} ok"))
    }
}

#[async_trait]
impl ControlPlane for ScriptedControlPlane {
    async fn list_running(&self) -> Result<DagSet, ControlError> {
        Ok(self.running())
    }

    async fn pause(&self, dag: &DagId) -> Result<String, ControlError> {
        self.call(Op::Pause, dag).await
    }

    async fn unpause(&self, dag: &DagId) -> Result<String, ControlError> {
        self.call(Op::Unpause, dag).await
    }

    async fn purge_metadata(&self, dag: &DagId) -> Result<String, ControlError> {
        self.call(Op::Purge, dag).await
    }

    async fn describe(&self) -> Result<String, ControlError> {
        Ok(self.prefix.clone())
    }
}

pub fn remote_root() -> RemoteRoot {
    "gs://bucket/dags".parse().expect("remote root")
}

/// Write `files` under `root`, creating parents.
pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (rel, contents) in files {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(path, contents).expect("write");
    }
}

/// Seed `store` with `files` under the `dags/` prefix.
pub fn deploy(store: &MemoryObjectStore, files: &[(&str, &str)]) {
    for (rel, contents) in files {
        store.insert(format!("dags/{rel}"), contents.as_bytes().to_vec());
    }
}
