//! What a task can reach while it runs.
//!
//! One [`RunContext`] is shared by every task of a run; each task gets its
//! own [`TaskContext`] on top, holding the call counters for its own calls.

use std::collections::BTreeMap;
use std::sync::Arc;

use biograph_common::{Gene, Paper, PaperDataset, Result};
use biograph_db::{Database, DocumentSnapshot, GraphStore, VectorStore};
use biograph_ingestion::{Collector, Embedder, RecordSource};
use biograph_resilience::{ApiTelemetry, CallCounts, CallStats, RateLimitConfig, ResilientCaller};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::consistency::{ConsistencyReport, ConsistencyValidator};
use crate::tasks::ConfigCheck;
use crate::workflow::{WorkflowKind, WorkflowParams};

// ── External APIs ─────────────────────────────────────────────────────────────

/// The external dependencies that each get one shared limiter and breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Api {
    Literature,
    Genes,
    Embeddings,
    Stores,
}

impl Api {
    pub const ALL: [Api; 4] = [Api::Literature, Api::Genes, Api::Embeddings, Api::Stores];

    pub fn as_str(&self) -> &'static str {
        match self {
            Api::Literature => "literature",
            Api::Genes => "genes",
            Api::Embeddings => "embeddings",
            Api::Stores => "stores",
        }
    }
}

/// `[rate_limits.*]` sections, one per [`Api`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimits {
    #[serde(default = "RateLimitConfig::ncbi")]
    pub literature: RateLimitConfig,
    #[serde(default = "RateLimitConfig::ncbi")]
    pub genes: RateLimitConfig,
    #[serde(default = "RateLimitConfig::embeddings")]
    pub embeddings: RateLimitConfig,
    #[serde(default = "RateLimitConfig::stores")]
    pub stores: RateLimitConfig,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            literature: RateLimitConfig::ncbi(),
            genes: RateLimitConfig::ncbi(),
            embeddings: RateLimitConfig::embeddings(),
            stores: RateLimitConfig::stores(),
        }
    }
}

/// One resilient caller per API, built once and shared by every run so all
/// tasks contend on the same limiter and breaker.
#[derive(Clone)]
pub struct ApiCallers {
    pub literature: Arc<ResilientCaller>,
    pub genes: Arc<ResilientCaller>,
    pub embeddings: Arc<ResilientCaller>,
    pub stores: Arc<ResilientCaller>,
}

impl ApiCallers {
    pub fn new(limits: &RateLimits) -> Result<Self> {
        Ok(Self {
            literature: Arc::new(ResilientCaller::new(Api::Literature.as_str(), limits.literature.clone())?),
            genes: Arc::new(ResilientCaller::new(Api::Genes.as_str(), limits.genes.clone())?),
            embeddings: Arc::new(ResilientCaller::new(Api::Embeddings.as_str(), limits.embeddings.clone())?),
            stores: Arc::new(ResilientCaller::new(Api::Stores.as_str(), limits.stores.clone())?),
        })
    }

    pub fn get(&self, api: Api) -> &Arc<ResilientCaller> {
        match api {
            Api::Literature => &self.literature,
            Api::Genes => &self.genes,
            Api::Embeddings => &self.embeddings,
            Api::Stores => &self.stores,
        }
    }

    pub async fn telemetry(&self) -> Vec<ApiTelemetry> {
        let mut out = Vec::with_capacity(Api::ALL.len());
        for api in Api::ALL {
            out.push(self.get(api).telemetry().await);
        }
        out
    }
}

// ── Services ──────────────────────────────────────────────────────────────────

/// Sources, embedder and stores the tasks operate on.
#[derive(Clone)]
pub struct Services {
    pub papers: Collector<Paper>,
    pub genes: Collector<Gene>,
    pub embedder: Arc<dyn Embedder>,
    pub snapshot: Arc<DocumentSnapshot>,
    pub graph: Arc<dyn GraphStore>,
    pub vectors: Arc<dyn VectorStore>,
}

impl Services {
    pub fn new(
        paper_source: Arc<dyn RecordSource<Paper>>,
        gene_source: Arc<dyn RecordSource<Gene>>,
        embedder: Arc<dyn Embedder>,
        db: &Database,
        callers: &ApiCallers,
    ) -> Self {
        Self {
            papers: Collector::new(paper_source, Arc::clone(&callers.literature)),
            genes: Collector::new(gene_source, Arc::clone(&callers.genes)),
            embedder,
            snapshot: db.snapshot(),
            graph: db.graph(),
            vectors: db.vectors(),
        }
    }
}

// ── Per-run state ─────────────────────────────────────────────────────────────

pub struct RunContext {
    pub run_id: Uuid,
    pub workflow: WorkflowKind,
    pub params: WorkflowParams,
    pub services: Services,
    pub callers: ApiCallers,
    pub config_checks: Vec<ConfigCheck>,
    /// Records collected by this run, handed from the collect tasks to the
    /// merge tasks.
    batch: Mutex<PaperDataset>,
    consistency: Mutex<Option<ConsistencyReport>>,
}

impl RunContext {
    pub fn new(
        run_id: Uuid,
        workflow: WorkflowKind,
        params: WorkflowParams,
        services: Services,
        callers: ApiCallers,
        config_checks: Vec<ConfigCheck>,
    ) -> Self {
        Self {
            run_id,
            workflow,
            params,
            services,
            callers,
            config_checks,
            batch: Mutex::new(PaperDataset::new()),
            consistency: Mutex::new(None),
        }
    }

    pub async fn batch(&self) -> MutexGuard<'_, PaperDataset> {
        self.batch.lock().await
    }

    pub fn validator(&self) -> ConsistencyValidator {
        ConsistencyValidator::new(
            Arc::clone(&self.services.snapshot),
            Arc::clone(&self.services.graph),
            Arc::clone(&self.services.vectors),
            Arc::clone(&self.callers.stores),
        )
    }

    pub(crate) async fn set_consistency(&self, report: ConsistencyReport) {
        *self.consistency.lock().await = Some(report);
    }

    pub(crate) async fn take_consistency(&self) -> Option<ConsistencyReport> {
        self.consistency.lock().await.take()
    }
}

pub struct TaskContext {
    task: String,
    run: Arc<RunContext>,
    calls: BTreeMap<Api, CallStats>,
}

impl TaskContext {
    pub(crate) fn new(task: impl Into<String>, run: Arc<RunContext>) -> Self {
        let calls = Api::ALL.into_iter().map(|api| (api, CallStats::new())).collect();
        Self { task: task.into(), run, calls }
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn run(&self) -> &RunContext {
        &self.run
    }

    pub fn params(&self) -> &WorkflowParams {
        &self.run.params
    }

    pub fn services(&self) -> &Services {
        &self.run.services
    }

    pub fn caller(&self, api: Api) -> &Arc<ResilientCaller> {
        self.run.callers.get(api)
    }

    /// This task's own counters for `api`.
    pub fn calls(&self, api: Api) -> Option<&CallStats> {
        self.calls.get(&api)
    }

    /// Sum over every API.
    pub fn total_calls(&self) -> CallCounts {
        let mut total = CallCounts::default();
        for stats in self.calls.values() {
            total.merge(&stats.counts());
        }
        total
    }

    /// APIs this task made at least one attempt against.
    pub fn used_apis(&self) -> Vec<Api> {
        self.calls
            .iter()
            .filter(|(_, stats)| stats.counts().attempts > 0)
            .map(|(api, _)| *api)
            .collect()
    }
}
