//! Graph merge / rebuild through a resilient caller.
//!
//! Writes are chunked so a failed call only retries its own chunk; chunks
//! already merged stay merged and are harmless to repeat.

use biograph_common::Result;
use biograph_db::{GraphStore, MergeStats};
use biograph_resilience::{CallStats, ResilientCaller};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::extraction::GraphBatch;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphMergeStats {
    pub entities: MergeStats,
    pub relationships: MergeStats,
}

/// Upsert every node, then every edge. Never deletes.
pub async fn merge_into_graph(
    store: &dyn GraphStore,
    caller: &ResilientCaller,
    local: Option<&CallStats>,
    batch: GraphBatch,
    chunk_size: usize,
) -> Result<GraphMergeStats> {
    let chunk_size = chunk_size.max(1);
    let mut stats = GraphMergeStats::default();

    for chunk in batch.entities.chunks(chunk_size) {
        let merged = caller
            .call_tracked(local, || store.upsert_entities(chunk.to_vec()))
            .await?;
        stats.entities.add(merged);
    }
    for chunk in batch.relationships.chunks(chunk_size) {
        let merged = caller
            .call_tracked(local, || store.upsert_relationships(chunk.to_vec()))
            .await?;
        stats.relationships.add(merged);
    }

    let dropped = batch.relationships.len().saturating_sub(stats.relationships.total());
    if dropped > 0 {
        warn!(dropped, "edges skipped because an endpoint is not in the graph");
    }
    info!(
        entities_inserted = stats.entities.inserted,
        entities_updated = stats.entities.updated,
        relationships_written = stats.relationships.written(),
        "graph merge complete"
    );
    Ok(stats)
}

/// Destructive: clear the graph, then merge `batch` into the empty store.
pub async fn rebuild_graph(
    store: &dyn GraphStore,
    caller: &ResilientCaller,
    local: Option<&CallStats>,
    batch: GraphBatch,
    chunk_size: usize,
) -> Result<GraphMergeStats> {
    warn!("clearing graph store for rebuild");
    caller.call_tracked(local, || store.delete_all()).await?;
    merge_into_graph(store, caller, local, batch, chunk_size).await
}
