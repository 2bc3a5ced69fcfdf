//! Local store bundle.
//!
//! Opens the snapshot, graph and vector files under one data directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use biograph_common::Result;
use serde::{Deserialize, Serialize};

use crate::graph::{GraphStore, MemoryGraphStore};
use crate::schema::EntityType;
use crate::snapshot::DocumentSnapshot;
use crate::vectors::{MemoryVectorStore, VectorStore};

pub const SNAPSHOT_FILE: &str = "snapshot.json";
pub const GRAPH_FILE: &str = "graph.json";
pub const VECTORS_FILE: &str = "vectors.json";

/// Main storage handle.
#[derive(Clone)]
pub struct Database {
    root: Option<PathBuf>,
    snapshot: Arc<DocumentSnapshot>,
    graph: Arc<MemoryGraphStore>,
    vectors: Arc<MemoryVectorStore>,
}

impl Database {
    /// Open or create the stores under `dir`.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let root = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self {
            snapshot: Arc::new(DocumentSnapshot::open(root.join(SNAPSHOT_FILE)).await?),
            graph: Arc::new(MemoryGraphStore::open(root.join(GRAPH_FILE)).await?),
            vectors: Arc::new(MemoryVectorStore::open(root.join(VECTORS_FILE)).await?),
            root: Some(root),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            root: None,
            snapshot: Arc::new(DocumentSnapshot::in_memory()),
            graph: Arc::new(MemoryGraphStore::in_memory()),
            vectors: Arc::new(MemoryVectorStore::in_memory()),
        }
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub fn snapshot(&self) -> Arc<DocumentSnapshot> {
        Arc::clone(&self.snapshot)
    }

    pub fn graph(&self) -> Arc<dyn GraphStore> {
        self.graph.clone()
    }

    pub fn vectors(&self) -> Arc<dyn VectorStore> {
        self.vectors.clone()
    }

    pub async fn stats(&self) -> Result<DatabaseStats> {
        let counts = self.snapshot.counts().await;
        Ok(DatabaseStats {
            snapshot_papers: counts.papers,
            snapshot_genes: counts.genes,
            graph_papers: self.graph.count_by_type(EntityType::Paper).await?,
            graph_genes: self.graph.count_by_type(EntityType::Gene).await?,
            graph_authors: self.graph.count_by_type(EntityType::Author).await?,
            graph_mesh_terms: self.graph.count_by_type(EntityType::MeshTerm).await?,
            graph_relationships: self.graph.count_relationships().await?,
            vectors: self.vectors.count().await?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseStats {
    pub snapshot_papers: usize,
    pub snapshot_genes: usize,
    pub graph_papers: usize,
    pub graph_genes: usize,
    pub graph_authors: usize,
    pub graph_mesh_terms: usize,
    pub graph_relationships: usize,
    pub vectors: usize,
}
