//! Canonical document snapshot.
//!
//! The JSON copy of every paper and gene the pipeline has collected. It is
//! the upstream side of the consistency check: the graph and vector stores
//! are expected to hold exactly what the snapshot holds.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use biograph_common::{Gene, Paper, PaperDataset, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::persist::{read_json_or_default, write_json_atomic};
use crate::schema::MergeStats;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotCounts {
    pub papers: usize,
    pub genes: usize,
}

#[derive(Debug)]
pub struct DocumentSnapshot {
    path: Option<PathBuf>,
    dataset: RwLock<PaperDataset>,
}

impl DocumentSnapshot {
    pub fn in_memory() -> Self {
        Self { path: None, dataset: RwLock::new(PaperDataset::new()) }
    }

    /// Open the snapshot at `path`; a missing file is an empty snapshot.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let dataset: PaperDataset = read_json_or_default(&path).await?;
        info!(
            path = %path.display(),
            papers = dataset.papers.len(),
            genes = dataset.genes.len(),
            "opened document snapshot"
        );
        Ok(Self { path: Some(path), dataset: RwLock::new(dataset) })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn merge_papers(&self, papers: Vec<Paper>) -> Result<MergeStats> {
        let mut dataset = self.dataset.write().await;
        let mut stats = MergeStats::default();
        for paper in papers {
            stats.record(dataset.papers.get(&paper.pmid), &paper);
            dataset.papers.insert(paper.pmid.clone(), paper);
        }
        self.persist_if_changed(&dataset, stats).await?;
        debug!(?stats, "merged papers into snapshot");
        Ok(stats)
    }

    pub async fn merge_genes(&self, genes: Vec<Gene>) -> Result<MergeStats> {
        let mut dataset = self.dataset.write().await;
        let mut stats = MergeStats::default();
        for gene in genes {
            stats.record(dataset.genes.get(&gene.gene_id), &gene);
            dataset.genes.insert(gene.gene_id.clone(), gene);
        }
        self.persist_if_changed(&dataset, stats).await?;
        debug!(?stats, "merged genes into snapshot");
        Ok(stats)
    }

    /// Swap in a whole new dataset (full rebuild).
    pub async fn replace_all(&self, replacement: PaperDataset) -> Result<SnapshotCounts> {
        let mut dataset = self.dataset.write().await;
        *dataset = replacement;
        if let Some(path) = &self.path {
            write_json_atomic(path, &*dataset).await?;
        }
        let counts = SnapshotCounts { papers: dataset.papers.len(), genes: dataset.genes.len() };
        info!(papers = counts.papers, genes = counts.genes, "snapshot replaced");
        Ok(counts)
    }

    pub async fn dataset(&self) -> PaperDataset {
        self.dataset.read().await.clone()
    }

    pub async fn papers(&self) -> Vec<Paper> {
        self.dataset.read().await.papers.values().cloned().collect()
    }

    pub async fn genes(&self) -> Vec<Gene> {
        self.dataset.read().await.genes.values().cloned().collect()
    }

    pub async fn paper_ids(&self) -> BTreeSet<String> {
        self.dataset.read().await.papers.keys().cloned().collect()
    }

    pub async fn gene_ids(&self) -> BTreeSet<String> {
        self.dataset.read().await.genes.keys().cloned().collect()
    }

    pub async fn counts(&self) -> SnapshotCounts {
        let dataset = self.dataset.read().await;
        SnapshotCounts { papers: dataset.papers.len(), genes: dataset.genes.len() }
    }

    async fn persist_if_changed(&self, dataset: &PaperDataset, stats: MergeStats) -> Result<()> {
        if stats.written() == 0 {
            return Ok(());
        }
        if let Some(path) = &self.path {
            write_json_atomic(path, dataset).await?;
        }
        Ok(())
    }
}
