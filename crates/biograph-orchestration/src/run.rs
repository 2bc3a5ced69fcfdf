//! Run records: what happened to each task and to the run as a whole.

use std::fmt::Write as _;

use biograph_common::{BiographError, ErrorClass};
use biograph_resilience::{ApiTelemetry, CallCounts};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::consistency::ConsistencyReport;
use crate::task::Counters;
use crate::workflow::WorkflowParams;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Success,
    PartialFailure,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::PartialFailure => "partial_failure",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Success,
    Failed,
    /// A hard dependency did not succeed.
    Skipped,
    /// Never started because the run was cancelled.
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Success => "success",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Pending | TaskStatus::Running)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub class: ErrorClass,
    pub message: String,
}

impl From<&BiographError> for TaskError {
    fn from(err: &BiographError) -> Self {
        Self { class: err.class(), message: err.to_string() }
    }
}

/// Everything a task reported, whether it succeeded or not.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskMetrics {
    pub counters: Counters,
    /// External calls made by this task only.
    pub calls: CallCounts,
    /// Limiter / breaker state of each API the task used, taken when it finished.
    pub telemetry: Vec<ApiTelemetry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub name: String,
    pub status: TaskStatus,
    pub critical: bool,
    #[serde(default)]
    pub metrics: TaskMetrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    /// Why the task was skipped or cancelled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: u64,
}

impl TaskResult {
    pub fn pending(name: impl Into<String>, critical: bool) -> Self {
        Self {
            name: name.into(),
            status: TaskStatus::Pending,
            critical,
            metrics: TaskMetrics::default(),
            error: None,
            reason: None,
            started_at: None,
            finished_at: None,
            duration_ms: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub run_id: Uuid,
    pub workflow: String,
    pub status: RunStatus,
    pub params: WorkflowParams,
    /// In execution order.
    pub tasks: Vec<TaskResult>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Every API's limiter / breaker state at the end of the run.
    #[serde(default)]
    pub telemetry: Vec<ApiTelemetry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consistency: Option<ConsistencyReport>,
}

impl WorkflowRun {
    pub fn task(&self, name: &str) -> Option<&TaskResult> {
        self.tasks.iter().find(|t| t.name == name)
    }

    pub(crate) fn task_mut(&mut self, name: &str) -> Option<&mut TaskResult> {
        self.tasks.iter_mut().find(|t| t.name == name)
    }

    /// Sum of every task's own calls.
    pub fn total_calls(&self) -> CallCounts {
        let mut total = CallCounts::default();
        for task in &self.tasks {
            total.merge(&task.metrics.calls);
        }
        total
    }

    /// Markdown completion report.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Workflow `{}`: {}", self.workflow, self.status);
        let _ = writeln!(out);
        let _ = writeln!(out, "- run id: `{}`", self.run_id);
        let _ = writeln!(out, "- started: {}", self.started_at.to_rfc3339());
        if let Some(finished) = self.finished_at {
            let secs = (finished - self.started_at).num_milliseconds() as f64 / 1000.0;
            let _ = writeln!(out, "- finished: {} ({secs:.1}s)", finished.to_rfc3339());
        }
        if !self.params.search_terms.is_empty() {
            let _ = writeln!(out, "- search terms: {}", self.params.search_terms.join(", "));
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "## Tasks");
        let _ = writeln!(out);
        let _ = writeln!(out, "| task | status | error | counters | calls | retries | ms |");
        let _ = writeln!(out, "|---|---|---|---|---|---|---|");
        for task in &self.tasks {
            let error = match (&task.error, &task.reason) {
                (Some(e), _) => format!("{}: {}", e.class, e.message.replace('|', "/")),
                (None, Some(reason)) => reason.clone(),
                (None, None) => String::new(),
            };
            let counters: Vec<String> =
                task.metrics.counters.iter().map(|(k, v)| format!("{k}={v}")).collect();
            let _ = writeln!(
                out,
                "| {}{} | {} | {} | {} | {} | {} | {} |",
                task.name,
                if task.critical { "" } else { " *" },
                task.status,
                error,
                counters.join(" "),
                task.metrics.calls.attempts,
                task.metrics.calls.retries,
                task.duration_ms,
            );
        }

        if !self.telemetry.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "## APIs");
            let _ = writeln!(out);
            let _ = writeln!(out, "| api | circuit | failures | opened | tokens | last 60s | throttled | wait ms | attempts | retries |");
            let _ = writeln!(out, "|---|---|---|---|---|---|---|---|---|---|");
            for api in &self.telemetry {
                let _ = writeln!(
                    out,
                    "| {} | {} | {} | {} | {:.1} | {} | {} | {} | {} | {} |",
                    api.api,
                    api.circuit.state,
                    api.circuit.consecutive_failures,
                    api.circuit.times_opened,
                    api.limiter.tokens_available,
                    api.limiter.requests_in_last_minute,
                    api.limiter.total_throttled,
                    api.limiter.total_wait_ms,
                    api.calls.attempts,
                    api.calls.retries,
                );
            }
        }

        if let Some(report) = &self.consistency {
            let _ = writeln!(out);
            let _ = writeln!(out, "## Consistency");
            let _ = writeln!(out);
            out.push_str(&report.summary());
        }
        out
    }
}

/// Aggregate status from final task results.
///
/// With no critical task declared every task counts as critical.
pub(crate) fn aggregate_status(tasks: &[TaskResult], cancelled: bool) -> RunStatus {
    if tasks.iter().all(|t| t.status == TaskStatus::Success) {
        return RunStatus::Success;
    }
    if cancelled && tasks.iter().any(|t| t.status == TaskStatus::Cancelled) {
        return RunStatus::Cancelled;
    }
    let any_critical = tasks.iter().any(|t| t.critical);
    let critical_succeeded = tasks
        .iter()
        .filter(|t| t.critical || !any_critical)
        .any(|t| t.status == TaskStatus::Success);
    if critical_succeeded {
        RunStatus::PartialFailure
    } else {
        RunStatus::Failed
    }
}
