//! Where runs live: in memory while the process is up, and optionally as
//! one JSON file per run so another process can read the status later.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use biograph_common::Result;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::run::{TaskResult, WorkflowRun};

/// Live view of every run started by this process.
#[derive(Debug, Clone, Default)]
pub struct RunRegistry {
    runs: Arc<RwLock<HashMap<Uuid, WorkflowRun>>>,
}

impl RunRegistry {
    pub async fn get(&self, run_id: Uuid) -> Option<WorkflowRun> {
        self.runs.read().await.get(&run_id).cloned()
    }

    /// Oldest first.
    pub async fn list(&self) -> Vec<WorkflowRun> {
        let mut runs: Vec<WorkflowRun> = self.runs.read().await.values().cloned().collect();
        runs.sort_by_key(|r| r.started_at);
        runs
    }

    pub(crate) async fn put(&self, run: WorkflowRun) {
        self.runs.write().await.insert(run.run_id, run);
    }

    pub(crate) async fn update_task(&self, run_id: Uuid, result: TaskResult) {
        let mut runs = self.runs.write().await;
        if let Some(slot) = runs.get_mut(&run_id).and_then(|run| run.task_mut(&result.name)) {
            *slot = result;
        }
    }
}

/// `<dir>/<run_id>.json`, written atomically.
#[derive(Debug, Clone)]
pub struct RunStore {
    dir: PathBuf,
}

impl RunStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, run_id: Uuid) -> PathBuf {
        self.dir.join(format!("{run_id}.json"))
    }

    pub async fn save(&self, run: &WorkflowRun) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(run.run_id);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(run)?;
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(path = %path.display(), "run saved");
        Ok(())
    }

    /// `None` when no run with that id was saved.
    pub async fn load(&self, run_id: Uuid) -> Result<Option<WorkflowRun>> {
        match tokio::fs::read(self.path_for(run_id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
