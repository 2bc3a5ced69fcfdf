//! Record shapes written to the graph and vector stores.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// Graph
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Paper,
    Gene,
    Author,
    MeshTerm,
}

impl EntityType {
    pub const ALL: [EntityType; 4] = [
        EntityType::Paper,
        EntityType::Gene,
        EntityType::Author,
        EntityType::MeshTerm,
    ];

    /// Prefix used in graph ids, e.g. `paper:12345`.
    pub fn prefix(&self) -> &'static str {
        match self {
            EntityType::Paper    => "paper",
            EntityType::Gene     => "gene",
            EntityType::Author   => "author",
            EntityType::MeshTerm => "mesh",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Paper    => "Paper",
            EntityType::Gene     => "Gene",
            EntityType::Author   => "Author",
            EntityType::MeshTerm => "MeshTerm",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A graph node. `key` is the natural key within its type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEntity {
    pub entity_type: EntityType,
    pub key: String,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

impl GraphEntity {
    pub fn new(entity_type: EntityType, key: impl Into<String>) -> Self {
        Self { entity_type, key: key.into(), properties: BTreeMap::new() }
    }

    pub fn with_property(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(name.to_string(), value.into());
        self
    }

    /// Globally unique id: `<prefix>:<key>`.
    pub fn id(&self) -> String {
        node_id(self.entity_type, &self.key)
    }
}

pub fn node_id(entity_type: EntityType, key: &str) -> String {
    format!("{}:{}", entity_type.prefix(), key)
}

/// A directed edge between two node ids. `(from, kind, to)` is its identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphRelationship {
    pub from: String,
    pub kind: String,
    pub to: String,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

impl GraphRelationship {
    pub fn new(from: impl Into<String>, kind: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            kind: kind.into(),
            to: to.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn identity(&self) -> (String, String, String) {
        (self.from.clone(), self.kind.clone(), self.to.clone())
    }
}

// =============================================================================
// Vectors
// =============================================================================

/// One embedding, keyed by the paper's PMID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    #[serde(default)]
    pub payload: BTreeMap<String, Value>,
}

impl VectorRecord {
    pub fn new(id: impl Into<String>, vector: Vec<f32>) -> Self {
        Self { id: id.into(), vector, payload: BTreeMap::new() }
    }
}

// =============================================================================
// Upsert bookkeeping
// =============================================================================

/// What an upsert-by-natural-key did to each incoming record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeStats {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl MergeStats {
    pub fn written(&self) -> usize {
        self.inserted + self.updated
    }

    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.unchanged
    }

    pub fn add(&mut self, other: MergeStats) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
    }

    /// Classify one upsert against the previous value for the same key.
    pub(crate) fn record<T: PartialEq>(&mut self, previous: Option<&T>, next: &T) {
        match previous {
            None => self.inserted += 1,
            Some(p) if p == next => self.unchanged += 1,
            Some(_) => self.updated += 1,
        }
    }
}
