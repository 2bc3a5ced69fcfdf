//! The unit of work a workflow is built from.

use std::collections::BTreeMap;

use async_trait::async_trait;
use biograph_common::Result;
use serde::{Deserialize, Serialize};

use crate::context::TaskContext;

/// How strongly a task depends on another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    /// The dependency must succeed, otherwise the dependent is skipped.
    Hard,
    /// Ordering only: the dependent runs once the dependency has finished,
    /// whatever its outcome.
    Soft,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub task: String,
    pub kind: DependencyKind,
}

impl Dependency {
    pub fn hard(task: impl Into<String>) -> Self {
        Self { task: task.into(), kind: DependencyKind::Hard }
    }

    pub fn soft(task: impl Into<String>) -> Self {
        Self { task: task.into(), kind: DependencyKind::Soft }
    }
}

/// Named counters a task reports, e.g. `papers_collected`.
pub type Counters = BTreeMap<String, u64>;

#[async_trait]
pub trait Task: Send + Sync {
    fn name(&self) -> &str;

    fn dependencies(&self) -> Vec<Dependency> {
        Vec::new()
    }

    /// Whether the run counts as failed when this task does not succeed.
    fn critical(&self) -> bool {
        true
    }

    /// Run once. External calls inside retry on their own; a returned error
    /// is final for this run.
    async fn run(&self, ctx: &TaskContext) -> Result<Counters>;
}
