//! Admission, execution and bookkeeping of workflow runs.

use std::collections::BTreeMap;
use std::sync::Arc;

use biograph_common::{BiographError, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::context::{ApiCallers, RunContext, Services};
use crate::executor::Executor;
use crate::registry::{RunRegistry, RunStore};
use crate::run::{aggregate_status, RunStatus, TaskResult, WorkflowRun};
use crate::tasks::ConfigCheck;
use crate::workflow::{default_search_terms, WorkflowDefinition, WorkflowKind, WorkflowParams};

/// `[orchestrator]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Upper bound on tasks running at once within one run.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Overrides every workflow's default per-term limit when set.
    #[serde(default)]
    pub max_results: Option<usize>,
    #[serde(default = "default_search_terms")]
    pub search_terms: Vec<String>,
}

fn default_max_concurrency() -> usize { 4 }

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            max_results: None,
            search_terms: default_search_terms(),
        }
    }
}

/// Held for the whole run. The full rebuild holds it exclusively.
enum Admission {
    Shared(#[allow(dead_code)] OwnedRwLockReadGuard<()>),
    Exclusive(#[allow(dead_code)] OwnedRwLockWriteGuard<()>),
}

pub struct RunHandle {
    run_id: Uuid,
    cancel: watch::Sender<bool>,
    join: JoinHandle<WorkflowRun>,
}

impl RunHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Stop starting new tasks. Tasks already running finish first.
    pub fn cancel(&self) {
        // receivers may already be gone if the run just finished
        let _ = self.cancel.send(true);
    }

    pub async fn wait(self) -> Result<WorkflowRun> {
        self.join
            .await
            .map_err(|e| BiographError::Workflow(format!("run {} aborted: {e}", self.run_id)))
    }
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    services: Services,
    callers: ApiCallers,
    config_checks: Vec<ConfigCheck>,
    registry: RunRegistry,
    store: Option<RunStore>,
    admission: Arc<RwLock<()>>,
    active: Arc<Mutex<BTreeMap<Uuid, WorkflowKind>>>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, services: Services, callers: ApiCallers) -> Self {
        Self {
            config,
            services,
            callers,
            config_checks: Vec::new(),
            registry: RunRegistry::default(),
            store: None,
            admission: Arc::new(RwLock::new(())),
            active: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Checks evaluated by the `validate-configuration` task.
    pub fn with_config_checks(mut self, checks: Vec<ConfigCheck>) -> Self {
        self.config_checks = checks;
        self
    }

    /// Persist every finished run, and read runs back from disk in `status`.
    pub fn with_run_store(mut self, store: RunStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn callers(&self) -> &ApiCallers {
        &self.callers
    }

    pub fn workflows(&self) -> Result<Vec<WorkflowDefinition>> {
        WorkflowKind::ALL.into_iter().map(WorkflowDefinition::build).collect()
    }

    /// Start `workflow` in the background.
    ///
    /// Fails at once if the workflow is unknown or would overlap a run it
    /// must not overlap.
    #[instrument(skip(self, params))]
    pub async fn submit(&self, workflow: &str, params: WorkflowParams) -> Result<RunHandle> {
        let kind: WorkflowKind = workflow.parse()?;
        let definition = WorkflowDefinition::build(kind)?;
        let run_id = Uuid::new_v4();
        let admission = self.admit(run_id, kind).await?;

        let params = params.resolve(kind, &self.config.search_terms, self.config.max_results);
        let run = WorkflowRun {
            run_id,
            workflow: kind.to_string(),
            status: RunStatus::Running,
            params: params.clone(),
            tasks: definition
                .graph
                .order()
                .iter()
                .map(|name| {
                    let critical = definition.graph.task(name).map(|t| t.critical()).unwrap_or(true);
                    TaskResult::pending(name.clone(), critical)
                })
                .collect(),
            started_at: Utc::now(),
            finished_at: None,
            telemetry: Vec::new(),
            consistency: None,
        };
        self.registry.put(run.clone()).await;
        info!(%run_id, workflow = %kind, terms = ?params.search_terms, "run started");

        let ctx = Arc::new(RunContext::new(
            run_id,
            kind,
            params,
            self.services.clone(),
            self.callers.clone(),
            self.config_checks.clone(),
        ));
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let registry = self.registry.clone();
        let store = self.store.clone();
        let active = Arc::clone(&self.active);
        let max_concurrency = self.config.max_concurrency;

        let join = tokio::spawn(async move {
            let executor = Executor {
                graph: &definition.graph,
                ctx: Arc::clone(&ctx),
                max_concurrency,
                cancel: cancel_rx,
                registry: &registry,
            };
            let (tasks, cancelled) = executor.run().await;

            let mut run = run;
            run.status = aggregate_status(&tasks, cancelled);
            run.tasks = tasks;
            run.finished_at = Some(Utc::now());
            run.telemetry = ctx.callers.telemetry().await;
            run.consistency = ctx.take_consistency().await;
            registry.put(run.clone()).await;

            if let Some(store) = &store {
                if let Err(e) = store.save(&run).await {
                    warn!(%run_id, error = %e, "could not persist run");
                }
            }
            info!(%run_id, workflow = %run.workflow, status = %run.status, "run finished");

            let mut active = active.lock().await;
            active.remove(&run_id);
            drop(admission);
            run
        });

        Ok(RunHandle { run_id, cancel: cancel_tx, join })
    }

    /// Submit and wait for completion.
    pub async fn run(&self, workflow: &str, params: WorkflowParams) -> Result<WorkflowRun> {
        self.submit(workflow, params).await?.wait().await
    }

    /// Live while the run is in progress; falls back to the run store.
    pub async fn status(&self, run_id: Uuid) -> Option<WorkflowRun> {
        if let Some(run) = self.registry.get(run_id).await {
            return Some(run);
        }
        let store = self.store.as_ref()?;
        match store.load(run_id).await {
            Ok(run) => run,
            Err(e) => {
                warn!(%run_id, error = %e, "could not read stored run");
                None
            }
        }
    }

    pub async fn runs(&self) -> Vec<WorkflowRun> {
        self.registry.list().await
    }

    async fn admit(&self, run_id: Uuid, kind: WorkflowKind) -> Result<Admission> {
        let mut active = self.active.lock().await;
        let lock = Arc::clone(&self.admission);
        let admitted = if kind.is_exclusive() {
            lock.try_write_owned().map(Admission::Exclusive).ok()
        } else {
            lock.try_read_owned().map(Admission::Shared).ok()
        };
        match admitted {
            Some(admission) => {
                active.insert(run_id, kind);
                Ok(admission)
            }
            None => {
                let running: Vec<String> =
                    active.iter().map(|(id, k)| format!("{k} ({id})")).collect();
                warn!(workflow = %kind, running = ?running, "run refused");
                Err(BiographError::Workflow(format!(
                    "workflow {kind} conflicts with running {}",
                    running.join(", ")
                )))
            }
        }
    }
}
