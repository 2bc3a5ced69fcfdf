//! Graph store capability and the map-backed adapter.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use biograph_common::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::persist::{read_json_or_default, write_json_atomic};
use crate::schema::{EntityType, GraphEntity, GraphRelationship, MergeStats};

/// What the orchestration core needs from a graph database. Every write is
/// a merge on natural key, so repeating it never duplicates a node or edge.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn upsert_entities(&self, entities: Vec<GraphEntity>) -> Result<MergeStats>;

    /// Edges whose endpoints are unknown are dropped and not counted.
    async fn upsert_relationships(&self, relationships: Vec<GraphRelationship>) -> Result<MergeStats>;

    async fn delete_all(&self) -> Result<()>;

    async fn count_by_type(&self, entity_type: EntityType) -> Result<usize>;

    async fn count_relationships(&self) -> Result<usize>;

    /// Natural keys (without the type prefix) of every node of this type.
    async fn list_ids(&self, entity_type: EntityType) -> Result<BTreeSet<String>>;
}

#[derive(Debug, Default)]
struct GraphData {
    entities: BTreeMap<String, GraphEntity>,
    relationships: BTreeMap<(String, String, String), GraphRelationship>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct GraphFile {
    entities: Vec<GraphEntity>,
    relationships: Vec<GraphRelationship>,
}

impl From<GraphFile> for GraphData {
    fn from(file: GraphFile) -> Self {
        Self {
            entities: file.entities.into_iter().map(|e| (e.id(), e)).collect(),
            relationships: file
                .relationships
                .into_iter()
                .map(|r| (r.identity(), r))
                .collect(),
        }
    }
}

/// Graph store held in memory, optionally mirrored to a JSON file after
/// every write.
#[derive(Debug)]
pub struct MemoryGraphStore {
    path: Option<PathBuf>,
    data: RwLock<GraphData>,
}

impl MemoryGraphStore {
    pub fn in_memory() -> Self {
        Self { path: None, data: RwLock::new(GraphData::default()) }
    }

    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file: GraphFile = read_json_or_default(&path).await?;
        let data = GraphData::from(file);
        info!(
            path = %path.display(),
            entities = data.entities.len(),
            relationships = data.relationships.len(),
            "opened graph store"
        );
        Ok(Self { path: Some(path), data: RwLock::new(data) })
    }

    async fn persist(&self, data: &GraphData) -> Result<()> {
        if let Some(path) = &self.path {
            let file = GraphFile {
                entities: data.entities.values().cloned().collect(),
                relationships: data.relationships.values().cloned().collect(),
            };
            write_json_atomic(path, &file).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn upsert_entities(&self, entities: Vec<GraphEntity>) -> Result<MergeStats> {
        let mut data = self.data.write().await;
        let mut stats = MergeStats::default();
        for entity in entities {
            let id = entity.id();
            stats.record(data.entities.get(&id), &entity);
            data.entities.insert(id, entity);
        }
        if stats.written() > 0 {
            self.persist(&data).await?;
        }
        debug!(?stats, "merged graph entities");
        Ok(stats)
    }

    async fn upsert_relationships(&self, relationships: Vec<GraphRelationship>) -> Result<MergeStats> {
        let mut data = self.data.write().await;
        let mut stats = MergeStats::default();
        for rel in relationships {
            if !data.entities.contains_key(&rel.from) || !data.entities.contains_key(&rel.to) {
                debug!(from = %rel.from, to = %rel.to, kind = %rel.kind, "skipping edge with unknown endpoint");
                continue;
            }
            let key = rel.identity();
            stats.record(data.relationships.get(&key), &rel);
            data.relationships.insert(key, rel);
        }
        if stats.written() > 0 {
            self.persist(&data).await?;
        }
        debug!(?stats, "merged graph relationships");
        Ok(stats)
    }

    async fn delete_all(&self) -> Result<()> {
        let mut data = self.data.write().await;
        let removed = data.entities.len();
        *data = GraphData::default();
        self.persist(&data).await?;
        info!(removed, "graph store cleared");
        Ok(())
    }

    async fn count_by_type(&self, entity_type: EntityType) -> Result<usize> {
        let data = self.data.read().await;
        Ok(data.entities.values().filter(|e| e.entity_type == entity_type).count())
    }

    async fn count_relationships(&self) -> Result<usize> {
        Ok(self.data.read().await.relationships.len())
    }

    async fn list_ids(&self, entity_type: EntityType) -> Result<BTreeSet<String>> {
        let data = self.data.read().await;
        Ok(data
            .entities
            .values()
            .filter(|e| e.entity_type == entity_type)
            .map(|e| e.key.clone())
            .collect())
    }
}
