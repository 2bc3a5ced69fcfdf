//! The three named workflows and their task graphs.

use std::str::FromStr;
use std::sync::Arc;

use biograph_common::{BiographError, Result};
use serde::{Deserialize, Serialize};

use crate::dag::TaskGraph;
use crate::task::Task;
use crate::tasks::{
    CollectFullDataset, CollectNewGenes, CollectNewPapers, MergeIntoGraph, MergeIntoVectorStore,
    RebuildGraph, RecreateVectorCollection, ReingestAllVectors, ValidateConfiguration,
    ValidateConsistency,
};

pub const DEFAULT_INCREMENTAL_MAX_RESULTS: usize = 50;
pub const DEFAULT_FULL_REBUILD_MAX_RESULTS: usize = 200;
pub const DEFAULT_BATCH_SIZE: usize = 50;

pub fn default_search_terms() -> Vec<String> {
    ["CRISPR gene editing", "immunotherapy cancer", "genome sequencing"]
        .into_iter()
        .map(String::from)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkflowKind {
    Incremental,
    FullRebuild,
    ConsistencyCheck,
}

impl WorkflowKind {
    pub const ALL: [WorkflowKind; 3] =
        [WorkflowKind::Incremental, WorkflowKind::FullRebuild, WorkflowKind::ConsistencyCheck];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowKind::Incremental => "incremental",
            WorkflowKind::FullRebuild => "full-rebuild",
            WorkflowKind::ConsistencyCheck => "consistency-check",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            WorkflowKind::Incremental => "collect recent papers and genes, merge them into both stores",
            WorkflowKind::FullRebuild => "re-collect everything and rebuild both stores from scratch",
            WorkflowKind::ConsistencyCheck => "compare the snapshot, graph and vector stores",
        }
    }

    /// Destructive workflows may not overlap any other run.
    pub fn is_exclusive(&self) -> bool {
        matches!(self, WorkflowKind::FullRebuild)
    }

    pub fn default_max_results(&self) -> usize {
        match self {
            WorkflowKind::FullRebuild => DEFAULT_FULL_REBUILD_MAX_RESULTS,
            _ => DEFAULT_INCREMENTAL_MAX_RESULTS,
        }
    }
}

impl std::fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowKind {
    type Err = BiographError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "incremental" | "incremental-update" => Ok(WorkflowKind::Incremental),
            "full-rebuild" | "rebuild" => Ok(WorkflowKind::FullRebuild),
            "consistency-check" | "consistency" | "check" => Ok(WorkflowKind::ConsistencyCheck),
            other => Err(BiographError::Workflow(format!("unknown workflow '{other}'"))),
        }
    }
}

/// Caller-supplied knobs. Unset fields fall back to the workflow's defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowParams {
    #[serde(default)]
    pub search_terms: Vec<String>,
    #[serde(default)]
    pub max_results_per_term: Option<usize>,
    #[serde(default)]
    pub batch_size: Option<usize>,
}

impl WorkflowParams {
    pub fn with_terms<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { search_terms: terms.into_iter().map(Into::into).collect(), ..Self::default() }
    }

    pub fn max_results_per_term(&self) -> usize {
        self.max_results_per_term.unwrap_or(DEFAULT_INCREMENTAL_MAX_RESULTS)
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE).max(1)
    }

    /// Fill every unset field so the stored run shows what was actually used.
    pub fn resolve(mut self, kind: WorkflowKind, default_terms: &[String], default_max: Option<usize>) -> Self {
        if self.search_terms.is_empty() {
            self.search_terms = if default_terms.is_empty() {
                default_search_terms()
            } else {
                default_terms.to_vec()
            };
        }
        self.search_terms.retain(|t| !t.trim().is_empty());
        self.max_results_per_term =
            Some(self.max_results_per_term.or(default_max).unwrap_or_else(|| kind.default_max_results()));
        self.batch_size = Some(self.batch_size());
        self
    }
}

#[derive(Debug)]
pub struct WorkflowDefinition {
    pub kind: WorkflowKind,
    pub graph: TaskGraph,
}

impl WorkflowDefinition {
    pub fn build(kind: WorkflowKind) -> Result<Self> {
        let tasks: Vec<Arc<dyn Task>> = match kind {
            WorkflowKind::Incremental => vec![
                Arc::new(CollectNewPapers),
                Arc::new(CollectNewGenes),
                Arc::new(MergeIntoGraph),
                Arc::new(MergeIntoVectorStore),
                Arc::new(ValidateConsistency::after(&[MergeIntoGraph::NAME, MergeIntoVectorStore::NAME])),
            ],
            WorkflowKind::FullRebuild => vec![
                Arc::new(ValidateConfiguration),
                Arc::new(CollectFullDataset),
                Arc::new(RebuildGraph),
                Arc::new(RecreateVectorCollection),
                Arc::new(ReingestAllVectors),
                Arc::new(ValidateConsistency::after(&[RebuildGraph::NAME, ReingestAllVectors::NAME])),
            ],
            WorkflowKind::ConsistencyCheck => vec![Arc::new(ValidateConsistency::after(&[]))],
        };
        Ok(Self { kind, graph: TaskGraph::new(tasks)? })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_names_and_aliases() {
        assert_eq!("incremental".parse::<WorkflowKind>().unwrap(), WorkflowKind::Incremental);
        assert_eq!("incremental_update".parse::<WorkflowKind>().unwrap(), WorkflowKind::Incremental);
        assert_eq!("Full-Rebuild".parse::<WorkflowKind>().unwrap(), WorkflowKind::FullRebuild);
        assert!("nightly".parse::<WorkflowKind>().is_err());
    }

    #[test]
    fn test_every_workflow_builds() {
        for kind in WorkflowKind::ALL {
            let def = WorkflowDefinition::build(kind).unwrap();
            assert_eq!(def.graph.order().last().map(String::as_str), Some("validate-consistency"));
        }
    }

    #[test]
    fn test_incremental_order() {
        let def = WorkflowDefinition::build(WorkflowKind::Incremental).unwrap();
        assert_eq!(
            def.graph.order(),
            [
                "collect-new-papers",
                "collect-new-genes",
                "merge-into-graph",
                "merge-into-vector-store",
                "validate-consistency"
            ]
        );
    }

    #[test]
    fn test_full_rebuild_order() {
        let def = WorkflowDefinition::build(WorkflowKind::FullRebuild).unwrap();
        assert_eq!(
            def.graph.order(),
            [
                "validate-configuration",
                "collect-full-dataset",
                "rebuild-graph",
                "recreate-vector-collection",
                "reingest-all-vectors",
                "validate-consistency"
            ]
        );
        assert!(WorkflowKind::FullRebuild.is_exclusive());
    }

    #[test]
    fn test_resolve_fills_defaults() {
        let params = WorkflowParams::default().resolve(WorkflowKind::FullRebuild, &[], None);
        assert_eq!(params.search_terms.len(), 3);
        assert_eq!(params.max_results_per_term, Some(200));
        assert_eq!(params.batch_size, Some(50));

        let params = WorkflowParams { max_results_per_term: Some(7), ..WorkflowParams::with_terms(["kras"]) }
            .resolve(WorkflowKind::Incremental, &["ignored".to_string()], Some(20));
        assert_eq!(params.search_terms, vec!["kras".to_string()]);
        assert_eq!(params.max_results_per_term, Some(7));
    }
}
