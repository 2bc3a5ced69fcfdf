//! Vector store capability and the map-backed adapter.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use biograph_common::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::DbError;
use crate::persist::{read_json_or_default, write_json_atomic};
use crate::schema::{MergeStats, VectorRecord};

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Upsert by record id.
    async fn upsert_vectors(&self, records: Vec<VectorRecord>) -> Result<MergeStats>;

    /// Drop every vector and start an empty collection.
    async fn recreate_collection(&self) -> Result<()>;

    async fn count(&self) -> Result<usize>;

    async fn list_ids(&self) -> Result<BTreeSet<String>>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Collection {
    #[serde(default)]
    dimension: Option<usize>,
    #[serde(default)]
    vectors: BTreeMap<String, VectorRecord>,
}

/// Vector collection held in memory, optionally mirrored to a JSON file.
///
/// The dimension is fixed either up front or by the first vector written
/// into an empty collection; mismatching vectors are rejected.
#[derive(Debug)]
pub struct MemoryVectorStore {
    path: Option<PathBuf>,
    configured_dimension: Option<usize>,
    collection: RwLock<Collection>,
}

impl MemoryVectorStore {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            configured_dimension: None,
            collection: RwLock::new(Collection::default()),
        }
    }

    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let collection: Collection = read_json_or_default(&path).await?;
        info!(path = %path.display(), vectors = collection.vectors.len(), "opened vector store");
        Ok(Self {
            path: Some(path),
            configured_dimension: None,
            collection: RwLock::new(collection),
        })
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.configured_dimension = Some(dimension);
        self
    }

    pub async fn get(&self, id: &str) -> Option<VectorRecord> {
        self.collection.read().await.vectors.get(id).cloned()
    }

    async fn persist(&self, collection: &Collection) -> Result<()> {
        if let Some(path) = &self.path {
            write_json_atomic(path, collection).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn upsert_vectors(&self, records: Vec<VectorRecord>) -> Result<MergeStats> {
        let mut collection = self.collection.write().await;

        let expected = self
            .configured_dimension
            .or(collection.dimension)
            .or_else(|| records.first().map(|r| r.vector.len()));
        if let Some(expected) = expected {
            if let Some(bad) = records.iter().find(|r| r.vector.len() != expected) {
                return Err(DbError::InvalidEmbeddingDimension {
                    id: bad.id.clone(),
                    expected,
                    actual: bad.vector.len(),
                }
                .into());
            }
            collection.dimension = Some(expected);
        }

        let mut stats = MergeStats::default();
        for record in records {
            stats.record(collection.vectors.get(&record.id), &record);
            collection.vectors.insert(record.id.clone(), record);
        }
        if stats.written() > 0 {
            self.persist(&collection).await?;
        }
        debug!(?stats, "upserted vectors");
        Ok(stats)
    }

    async fn recreate_collection(&self) -> Result<()> {
        let mut collection = self.collection.write().await;
        let dropped = collection.vectors.len();
        *collection = Collection::default();
        self.persist(&collection).await?;
        info!(dropped, "vector collection recreated");
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.collection.read().await.vectors.len())
    }

    async fn list_ids(&self) -> Result<BTreeSet<String>> {
        Ok(self.collection.read().await.vectors.keys().cloned().collect())
    }
}
