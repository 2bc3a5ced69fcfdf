//! biograph-kg: Mapping collected records into the knowledge graph and
//! merging them through the graph store capability.

pub mod extraction;
pub mod update;

pub use extraction::{build_batch, GraphBatch, AUTHORED_BY, CITES, HAS_MESH_TERM, MENTIONED_IN};
pub use update::{merge_into_graph, rebuild_graph, GraphMergeStats};
