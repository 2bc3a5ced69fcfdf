//! Cross-store consistency check.
//!
//! The snapshot is upstream; the graph and vector stores are downstream
//! copies. For each entity kind the validator compares identifier sets and
//! reports what is missing downstream and what is orphaned there. It only
//! reads; repair is a later incremental run or an operator's job.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::sync::Arc;

use biograph_common::Result;
use biograph_db::{DocumentSnapshot, EntityType, GraphStore, VectorStore};
use biograph_resilience::{CallStats, ResilientCaller};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

/// Comparison of one entity kind across stores.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreComparison {
    pub snapshot_count: usize,
    pub graph_count: usize,
    /// `None` for kinds that are not embedded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_count: Option<usize>,
    #[serde(default)]
    pub missing_in_graph: BTreeSet<String>,
    #[serde(default)]
    pub missing_in_vectors: BTreeSet<String>,
    #[serde(default)]
    pub orphaned_in_graph: BTreeSet<String>,
    #[serde(default)]
    pub orphaned_in_vectors: BTreeSet<String>,
}

impl StoreComparison {
    fn compare(
        snapshot: &BTreeSet<String>,
        graph: &BTreeSet<String>,
        vectors: Option<&BTreeSet<String>>,
    ) -> Self {
        let diff = |a: &BTreeSet<String>, b: &BTreeSet<String>| -> BTreeSet<String> {
            a.difference(b).cloned().collect()
        };
        Self {
            snapshot_count: snapshot.len(),
            graph_count: graph.len(),
            vector_count: vectors.map(BTreeSet::len),
            missing_in_graph: diff(snapshot, graph),
            missing_in_vectors: vectors.map(|v| diff(snapshot, v)).unwrap_or_default(),
            orphaned_in_graph: diff(graph, snapshot),
            orphaned_in_vectors: vectors.map(|v| diff(v, snapshot)).unwrap_or_default(),
        }
    }

    /// Present downstream, absent from the snapshot.
    pub fn orphaned(&self) -> BTreeSet<String> {
        self.orphaned_in_graph.union(&self.orphaned_in_vectors).cloned().collect()
    }

    pub fn mismatch_count(&self) -> usize {
        self.missing_in_graph.len()
            + self.missing_in_vectors.len()
            + self.orphaned_in_graph.len()
            + self.orphaned_in_vectors.len()
    }

    pub fn is_consistent(&self) -> bool {
        self.mismatch_count() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyReport {
    pub checked_at: DateTime<Utc>,
    pub papers: StoreComparison,
    pub genes: StoreComparison,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.papers.is_consistent() && self.genes.is_consistent()
    }

    pub fn mismatch_count(&self) -> usize {
        self.papers.mismatch_count() + self.genes.mismatch_count()
    }

    /// Markdown section for the run summary.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let verdict = if self.is_consistent() { "consistent" } else { "INCONSISTENT" };
        let _ = writeln!(out, "Stores are {verdict} ({} mismatches).", self.mismatch_count());
        let _ = writeln!(out);
        let _ = writeln!(out, "| kind | snapshot | graph | vectors | missing in graph | missing in vectors | orphaned |");
        let _ = writeln!(out, "|---|---|---|---|---|---|---|");
        for (kind, cmp) in [("papers", &self.papers), ("genes", &self.genes)] {
            let _ = writeln!(
                out,
                "| {kind} | {} | {} | {} | {} | {} | {} |",
                cmp.snapshot_count,
                cmp.graph_count,
                cmp.vector_count.map(|n| n.to_string()).unwrap_or_else(|| "-".into()),
                preview(&cmp.missing_in_graph),
                preview(&cmp.missing_in_vectors),
                preview(&cmp.orphaned()),
            );
        }
        out
    }
}

fn preview(ids: &BTreeSet<String>) -> String {
    const SHOWN: usize = 5;
    if ids.is_empty() {
        return "0".into();
    }
    let head: Vec<&str> = ids.iter().take(SHOWN).map(String::as_str).collect();
    let more = if ids.len() > SHOWN { ", ..." } else { "" };
    format!("{} ({}{more})", ids.len(), head.join(", "))
}

pub struct ConsistencyValidator {
    snapshot: Arc<DocumentSnapshot>,
    graph: Arc<dyn GraphStore>,
    vectors: Arc<dyn VectorStore>,
    stores: Arc<ResilientCaller>,
}

impl ConsistencyValidator {
    pub fn new(
        snapshot: Arc<DocumentSnapshot>,
        graph: Arc<dyn GraphStore>,
        vectors: Arc<dyn VectorStore>,
        stores: Arc<ResilientCaller>,
    ) -> Self {
        Self { snapshot, graph, vectors, stores }
    }

    /// Papers are checked against both stores, genes against the graph only.
    #[instrument(skip_all)]
    pub async fn validate(&self, local: Option<&CallStats>) -> Result<ConsistencyReport> {
        let snapshot_papers = self.snapshot.paper_ids().await;
        let snapshot_genes = self.snapshot.gene_ids().await;

        let graph_papers = self
            .stores
            .call_tracked(local, || self.graph.list_ids(EntityType::Paper))
            .await?;
        let graph_genes = self
            .stores
            .call_tracked(local, || self.graph.list_ids(EntityType::Gene))
            .await?;
        let vector_ids = self.stores.call_tracked(local, || self.vectors.list_ids()).await?;

        let report = ConsistencyReport {
            checked_at: Utc::now(),
            papers: StoreComparison::compare(&snapshot_papers, &graph_papers, Some(&vector_ids)),
            genes: StoreComparison::compare(&snapshot_genes, &graph_genes, None),
        };

        for (kind, cmp) in [("papers", &report.papers), ("genes", &report.genes)] {
            if cmp.is_consistent() {
                continue;
            }
            warn!(
                kind,
                missing_in_graph = cmp.missing_in_graph.len(),
                missing_in_vectors = cmp.missing_in_vectors.len(),
                orphaned_in_graph = cmp.orphaned_in_graph.len(),
                orphaned_in_vectors = cmp.orphaned_in_vectors.len(),
                "store mismatch"
            );
        }
        info!(
            papers = report.papers.snapshot_count,
            genes = report.genes.snapshot_count,
            consistent = report.is_consistent(),
            "consistency check complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use biograph_db::{GraphEntity, MemoryGraphStore, MemoryVectorStore, VectorRecord};
    use biograph_common::Paper;
    use biograph_resilience::RateLimitConfig;

    use super::*;

    fn ids(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_compare_classifies_differences() {
        let cmp = StoreComparison::compare(&ids(&["1", "2", "3"]), &ids(&["1", "4"]), Some(&ids(&["1", "2", "5"])));
        assert_eq!(cmp.missing_in_graph, ids(&["2", "3"]));
        assert_eq!(cmp.missing_in_vectors, ids(&["3"]));
        assert_eq!(cmp.orphaned(), ids(&["4", "5"]));
        assert_eq!(cmp.mismatch_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_validate_reads_every_store() {
        let snapshot = Arc::new(DocumentSnapshot::in_memory());
        snapshot
            .merge_papers(vec![Paper::new("1", "a"), Paper::new("2", "b")])
            .await
            .unwrap();
        let graph = Arc::new(MemoryGraphStore::in_memory());
        graph
            .upsert_entities(vec![GraphEntity::new(EntityType::Paper, "1"), GraphEntity::new(EntityType::Paper, "2")])
            .await
            .unwrap();
        let vectors = Arc::new(MemoryVectorStore::in_memory());
        vectors.upsert_vectors(vec![VectorRecord::new("1", vec![0.1, 0.2])]).await.unwrap();

        let stores = Arc::new(ResilientCaller::new("stores", RateLimitConfig::stores()).unwrap());
        let validator = ConsistencyValidator::new(snapshot, graph, vectors, Arc::clone(&stores));
        let local = CallStats::new();
        let report = validator.validate(Some(&local)).await.unwrap();

        assert!(!report.is_consistent());
        assert!(report.papers.missing_in_graph.is_empty());
        assert_eq!(report.papers.missing_in_vectors, ids(&["2"]));
        assert!(report.genes.is_consistent());
        assert_eq!(local.counts().attempts, 3);
        assert!(report.summary().contains("INCONSISTENT"));
    }
}
