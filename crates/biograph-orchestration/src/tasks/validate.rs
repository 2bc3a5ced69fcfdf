use async_trait::async_trait;
use biograph_common::{BiographError, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::set;
use crate::context::{Api, TaskContext};
use crate::task::{Counters, Dependency, Task};

/// A named pre-flight check evaluated by whoever builds the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigCheck {
    pub name: String,
    pub ok: bool,
    pub detail: String,
}

impl ConfigCheck {
    pub fn pass(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self { name: name.into(), ok: true, detail: detail.into() }
    }

    pub fn fail(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self { name: name.into(), ok: false, detail: detail.into() }
    }
}

pub struct ValidateConfiguration;

impl ValidateConfiguration {
    pub const NAME: &'static str = "validate-configuration";
}

#[async_trait]
impl Task for ValidateConfiguration {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn run(&self, ctx: &TaskContext) -> Result<Counters> {
        let checks = &ctx.run().config_checks;
        let failed: Vec<&ConfigCheck> = checks.iter().filter(|c| !c.ok).collect();
        for check in &failed {
            warn!(check = %check.name, detail = %check.detail, "configuration check failed");
        }
        if !failed.is_empty() {
            let list: Vec<String> = failed.iter().map(|c| format!("{} ({})", c.name, c.detail)).collect();
            return Err(BiographError::Config(format!("failed checks: {}", list.join("; "))));
        }

        info!(checks = checks.len(), "configuration valid");
        let mut counters = Counters::new();
        set(&mut counters, "checks_passed", checks.len());
        Ok(counters)
    }
}

/// Read-only comparison of the three stores. Non-critical, and attached by
/// soft edges so a report is produced even after upstream failures.
pub struct ValidateConsistency {
    after: Vec<String>,
}

impl ValidateConsistency {
    pub const NAME: &'static str = "validate-consistency";

    pub fn after(tasks: &[&str]) -> Self {
        Self { after: tasks.iter().map(|t| t.to_string()).collect() }
    }
}

#[async_trait]
impl Task for ValidateConsistency {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn dependencies(&self) -> Vec<Dependency> {
        self.after.iter().map(Dependency::soft).collect()
    }

    fn critical(&self) -> bool {
        false
    }

    async fn run(&self, ctx: &TaskContext) -> Result<Counters> {
        let report = ctx.run().validator().validate(ctx.calls(Api::Stores)).await?;

        let mut counters = Counters::new();
        set(&mut counters, "mismatches", report.mismatch_count());
        set(&mut counters, "papers_missing_in_graph", report.papers.missing_in_graph.len());
        set(&mut counters, "papers_missing_in_vectors", report.papers.missing_in_vectors.len());
        set(&mut counters, "papers_orphaned", report.papers.orphaned().len());
        set(&mut counters, "genes_missing_in_graph", report.genes.missing_in_graph.len());
        set(&mut counters, "genes_orphaned", report.genes.orphaned().len());
        ctx.run().set_consistency(report).await;
        Ok(counters)
    }
}
