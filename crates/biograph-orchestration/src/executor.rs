//! Topological executor.
//!
//! Tasks whose dependencies are all terminal are started in graph order, at
//! most `max_concurrency` at a time. A task whose hard dependency did not
//! succeed is skipped without running, which in turn skips its own hard
//! dependents. Cancellation is only observed between tasks: in-flight tasks
//! always finish.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use biograph_common::{ErrorClass, Result};
use chrono::Utc;
use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::{Id, JoinSet};
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::context::{RunContext, TaskContext};
use crate::dag::TaskGraph;
use crate::registry::RunRegistry;
use crate::run::{TaskError, TaskMetrics, TaskResult, TaskStatus};
use crate::task::{Counters, DependencyKind};

/// `Err` carries the message of a task that panicked or was aborted.
type Outcome = std::result::Result<Result<Counters>, String>;
type Finished = (String, TaskContext, Instant, Outcome);

pub(crate) struct Executor<'a> {
    pub graph: &'a TaskGraph,
    pub ctx: Arc<RunContext>,
    pub max_concurrency: usize,
    pub cancel: watch::Receiver<bool>,
    pub registry: &'a RunRegistry,
}

impl Executor<'_> {
    /// Returns final results in graph order and whether cancellation was seen.
    pub async fn run(self) -> (Vec<TaskResult>, bool) {
        let run_id = self.ctx.run_id;
        let mut progress = Progress::new(self.graph);
        let mut running: JoinSet<Finished> = JoinSet::new();
        let mut in_flight: HashMap<Id, (String, Instant)> = HashMap::new();
        let mut cancelled = false;
        let max_concurrency = self.max_concurrency.max(1);

        loop {
            while running.len() < max_concurrency {
                let Some(name) = progress.ready.pop_front() else { break };
                cancelled |= *self.cancel.borrow();

                let blocked = if cancelled {
                    Some((TaskStatus::Cancelled, "run cancelled before the task started".to_string()))
                } else {
                    progress.blocking_dependency(self.graph, &name)
                };
                if let Some((status, reason)) = blocked {
                    if status == TaskStatus::Skipped {
                        warn!(%run_id, task = %name, %reason, "task skipped");
                    }
                    if let Some(result) = progress.results.get_mut(&name) {
                        result.status = status;
                        result.reason = Some(reason);
                        self.registry.update_task(run_id, result.clone()).await;
                    }
                    progress.release(self.graph, &name);
                    continue;
                }

                let Some(task) = self.graph.task(&name).cloned() else { continue };
                let started = Instant::now();
                if let Some(result) = progress.results.get_mut(&name) {
                    result.status = TaskStatus::Running;
                    result.started_at = Some(Utc::now());
                    self.registry.update_task(run_id, result.clone()).await;
                }
                info!(%run_id, task = %name, "task started");

                let task_ctx = TaskContext::new(name.clone(), Arc::clone(&self.ctx));
                let spawned_name = name.clone();
                let handle = running.spawn(async move {
                    let outcome = AssertUnwindSafe(task.run(&task_ctx))
                        .catch_unwind()
                        .await
                        .map_err(panic_message);
                    (spawned_name, task_ctx, started, outcome)
                });
                in_flight.insert(handle.id(), (name, started));
            }

            let Some(joined) = running.join_next_with_id().await else { break };
            let (name, metrics, started, outcome) = match joined {
                Ok((id, (name, task_ctx, started, outcome))) => {
                    in_flight.remove(&id);
                    let mut metrics = TaskMetrics { calls: task_ctx.total_calls(), ..TaskMetrics::default() };
                    for api in task_ctx.used_apis() {
                        metrics.telemetry.push(self.ctx.callers.get(api).telemetry().await);
                    }
                    (name, metrics, started, outcome)
                }
                Err(err) => {
                    let Some((name, started)) = in_flight.remove(&err.id()) else { continue };
                    (name, TaskMetrics::default(), started, Err(format!("task aborted: {err}")))
                }
            };

            if let Some(result) = progress.settle(run_id, &name, started.elapsed(), metrics, outcome) {
                self.registry.update_task(run_id, result).await;
            }
            progress.release(self.graph, &name);
        }

        let (ordered, interrupted) = progress.into_ordered(self.graph);
        (ordered, cancelled || interrupted)
    }
}

/// Per-task results plus how many dependencies each task still waits for.
struct Progress {
    results: BTreeMap<String, TaskResult>,
    waiting: BTreeMap<String, usize>,
    ready: VecDeque<String>,
}

impl Progress {
    fn new(graph: &TaskGraph) -> Self {
        let results = graph
            .order()
            .iter()
            .map(|name| {
                let critical = graph.task(name).map(|t| t.critical()).unwrap_or(true);
                (name.clone(), TaskResult::pending(name.clone(), critical))
            })
            .collect();
        let waiting: BTreeMap<String, usize> = graph
            .order()
            .iter()
            .map(|name| (name.clone(), graph.dependencies(name).len()))
            .collect();
        let ready = graph.order().iter().filter(|n| waiting.get(*n) == Some(&0)).cloned().collect();
        Self { results, waiting, ready }
    }

    /// A hard dependency that did not succeed, as a skip reason.
    fn blocking_dependency(&self, graph: &TaskGraph, name: &str) -> Option<(TaskStatus, String)> {
        graph
            .dependencies(name)
            .iter()
            .filter(|d| d.kind == DependencyKind::Hard)
            .find_map(|d| {
                let status = self.results.get(&d.task).map(|r| r.status)?;
                (status != TaskStatus::Success)
                    .then(|| (TaskStatus::Skipped, format!("dependency '{}' {}", d.task, status)))
            })
    }

    /// Record how a started task ended. Panics and aborts count as internal failures.
    fn settle(
        &mut self,
        run_id: Uuid,
        name: &str,
        elapsed: Duration,
        metrics: TaskMetrics,
        outcome: Outcome,
    ) -> Option<TaskResult> {
        let result = self.results.get_mut(name)?;
        result.finished_at = Some(Utc::now());
        result.duration_ms = elapsed.as_millis() as u64;
        result.metrics = metrics;

        match outcome {
            Ok(Ok(counters)) => {
                result.metrics.counters = counters;
                result.status = TaskStatus::Success;
                info!(%run_id, task = %name, ms = result.duration_ms, counters = ?result.metrics.counters, "task finished");
            }
            Ok(Err(err)) => {
                result.status = TaskStatus::Failed;
                result.error = Some(TaskError::from(&err));
                error!(%run_id, task = %name, class = %err.class(), error = %err, "task failed");
            }
            Err(message) => {
                error!(%run_id, task = %name, error = %message, "task crashed");
                result.status = TaskStatus::Failed;
                result.error = Some(TaskError { class: ErrorClass::Internal, message });
            }
        }
        Some(result.clone())
    }

    /// `name` is terminal: dependents with nothing left to wait for become ready.
    fn release(&mut self, graph: &TaskGraph, name: &str) {
        for dependent in graph.dependents(name) {
            if let Some(left) = self.waiting.get_mut(dependent) {
                *left = left.saturating_sub(1);
                if *left == 0 {
                    self.ready.push_back(dependent.to_string());
                }
            }
        }
    }

    /// Results in graph order. Anything still unfinished is marked cancelled,
    /// and the flag reports whether that happened.
    fn into_ordered(mut self, graph: &TaskGraph) -> (Vec<TaskResult>, bool) {
        let mut interrupted = false;
        let mut ordered = Vec::with_capacity(self.results.len());
        for name in graph.order() {
            if let Some(mut result) = self.results.remove(name) {
                if !result.status.is_terminal() {
                    result.status = TaskStatus::Cancelled;
                    result.reason = Some("interrupted".into());
                    interrupted = true;
                }
                ordered.push(result);
            }
        }
        (ordered, interrupted)
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("task panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("task panicked: {s}")
    } else {
        "task panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use biograph_common::{Gene, Paper};
    use biograph_db::Database;
    use biograph_ingestion::{Embedder, Page, RecordSource};

    use super::*;
    use crate::context::{ApiCallers, RateLimits, Services};
    use crate::run::{aggregate_status, RunStatus};
    use crate::task::{Dependency, Task};
    use crate::workflow::{WorkflowKind, WorkflowParams};

    struct Empty;

    #[async_trait]
    impl RecordSource<Paper> for Empty {
        fn name(&self) -> &str {
            "empty"
        }

        async fn fetch(&self, _query: &str, _cursor: Option<&str>) -> Result<Page<Paper>> {
            Ok(Page::last(Vec::new()))
        }
    }

    #[async_trait]
    impl RecordSource<Gene> for Empty {
        fn name(&self) -> &str {
            "empty"
        }

        async fn fetch(&self, _query: &str, _cursor: Option<&str>) -> Result<Page<Gene>> {
            Ok(Page::last(Vec::new()))
        }
    }

    #[async_trait]
    impl Embedder for Empty {
        fn dimension(&self) -> usize {
            1
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0]).collect())
        }
    }

    /// Tracks how many sleepers are inside `run` at once.
    #[derive(Default)]
    struct Gauge {
        live: AtomicUsize,
        peak: AtomicUsize,
    }

    struct Sleeper {
        name: String,
        deps: Vec<Dependency>,
        gauge: Arc<Gauge>,
    }

    #[async_trait]
    impl Task for Sleeper {
        fn name(&self) -> &str {
            &self.name
        }

        fn dependencies(&self) -> Vec<Dependency> {
            self.deps.clone()
        }

        async fn run(&self, _ctx: &TaskContext) -> Result<Counters> {
            let now = self.gauge.live.fetch_add(1, Ordering::SeqCst) + 1;
            self.gauge.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            self.gauge.live.fetch_sub(1, Ordering::SeqCst);
            Ok(Counters::new())
        }
    }

    struct Boom;

    #[async_trait]
    impl Task for Boom {
        fn name(&self) -> &str {
            "boom"
        }

        async fn run(&self, _ctx: &TaskContext) -> Result<Counters> {
            panic!("boom")
        }
    }

    fn sleeper(name: &str, deps: Vec<Dependency>, gauge: &Arc<Gauge>) -> Arc<dyn Task> {
        Arc::new(Sleeper { name: name.to_string(), deps, gauge: Arc::clone(gauge) })
    }

    fn context() -> Arc<RunContext> {
        let callers = ApiCallers::new(&RateLimits::default()).unwrap();
        let empty = Arc::new(Empty);
        let services = Services::new(empty.clone(), empty.clone(), empty, &Database::in_memory(), &callers);
        Arc::new(RunContext::new(
            Uuid::new_v4(),
            WorkflowKind::ConsistencyCheck,
            WorkflowParams::default(),
            services,
            callers,
            Vec::new(),
        ))
    }

    async fn execute(tasks: Vec<Arc<dyn Task>>, max_concurrency: usize) -> (Vec<TaskResult>, bool) {
        let graph = TaskGraph::new(tasks).unwrap();
        let registry = RunRegistry::default();
        let (_cancel_tx, cancel) = watch::channel(false);
        Executor { graph: &graph, ctx: context(), max_concurrency, cancel, registry: &registry }
            .run()
            .await
    }

    fn find<'a>(results: &'a [TaskResult], name: &str) -> &'a TaskResult {
        results.iter().find(|r| r.name == name).unwrap()
    }

    async fn peak_with(max_concurrency: usize, tasks: usize) -> (usize, Duration) {
        let gauge = Arc::new(Gauge::default());
        let graph = (0..tasks).map(|i| sleeper(&format!("t{i}"), Vec::new(), &gauge)).collect();
        let start = Instant::now();
        let (results, cancelled) = execute(graph, max_concurrency).await;
        assert!(!cancelled);
        assert!(results.iter().all(|r| r.status == TaskStatus::Success));
        (gauge.peak.load(Ordering::SeqCst), start.elapsed())
    }

    #[tokio::test(start_paused = true)]
    async fn test_independent_tasks_never_exceed_max_concurrency() {
        let (peak, elapsed) = peak_with(1, 4).await;
        assert_eq!(peak, 1);
        assert!(elapsed >= Duration::from_millis(400));

        let (peak, elapsed) = peak_with(2, 4).await;
        assert_eq!(peak, 2);
        assert!(elapsed >= Duration::from_millis(200) && elapsed < Duration::from_millis(300));

        let (peak, elapsed) = peak_with(8, 4).await;
        assert_eq!(peak, 4);
        assert!(elapsed < Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dependents_wait_for_their_dependency() {
        let gauge = Arc::new(Gauge::default());
        let (results, _) = execute(
            vec![
                sleeper("first", Vec::new(), &gauge),
                sleeper("second", vec![Dependency::hard("first")], &gauge),
            ],
            4,
        )
        .await;
        assert_eq!(gauge.peak.load(Ordering::SeqCst), 1);
        let first = find(&results, "first").finished_at.unwrap();
        let second = find(&results, "second").started_at.unwrap();
        assert!(second >= first);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_task_fails_and_skips_hard_dependents() {
        let gauge = Arc::new(Gauge::default());
        let (results, cancelled) = execute(
            vec![
                Arc::new(Boom) as Arc<dyn Task>,
                sleeper("after", vec![Dependency::hard("boom")], &gauge),
                sleeper("beside", Vec::new(), &gauge),
                sleeper("report", vec![Dependency::soft("boom")], &gauge),
            ],
            2,
        )
        .await;

        assert!(!cancelled);
        let boom = find(&results, "boom");
        assert_eq!(boom.status, TaskStatus::Failed);
        let error = boom.error.as_ref().unwrap();
        assert_eq!(error.class, ErrorClass::Internal);
        assert_eq!(error.message, "task panicked: boom");

        let after = find(&results, "after");
        assert_eq!(after.status, TaskStatus::Skipped);
        assert_eq!(after.reason.as_deref(), Some("dependency 'boom' failed"));
        assert_eq!(find(&results, "beside").status, TaskStatus::Success);
        assert_eq!(find(&results, "report").status, TaskStatus::Success);
        assert_eq!(aggregate_status(&results, cancelled), RunStatus::PartialFailure);
    }

    #[test]
    fn test_aborted_task_fails_and_releases_dependents() {
        let gauge = Arc::new(Gauge::default());
        let graph = TaskGraph::new(vec![
            sleeper("a", Vec::new(), &gauge),
            sleeper("b", vec![Dependency::hard("a")], &gauge),
        ])
        .unwrap();
        let mut progress = Progress::new(&graph);
        assert_eq!(progress.ready.pop_front().as_deref(), Some("a"));
        assert!(progress.ready.is_empty());

        let settled = progress
            .settle(
                Uuid::new_v4(),
                "a",
                Duration::ZERO,
                TaskMetrics::default(),
                Err("task aborted: task 7 was cancelled".into()),
            )
            .unwrap();
        assert_eq!(settled.status, TaskStatus::Failed);
        assert_eq!(settled.error.unwrap().class, ErrorClass::Internal);

        progress.release(&graph, "a");
        assert_eq!(progress.ready.pop_front().as_deref(), Some("b"));
        assert_eq!(
            progress.blocking_dependency(&graph, "b"),
            Some((TaskStatus::Skipped, "dependency 'a' failed".to_string()))
        );

        let (ordered, interrupted) = progress.into_ordered(&graph);
        assert!(interrupted);
        assert_eq!(ordered[1].status, TaskStatus::Cancelled);
    }
}
