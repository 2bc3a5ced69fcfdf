//! Biograph Storage Layer
//!
//! The three stores a workflow keeps in step:
//!
//! - [`DocumentSnapshot`]: canonical JSON copy of every collected record
//! - [`GraphStore`]: entities and relationships keyed by natural key
//! - [`VectorStore`]: one embedding per paper
//!
//! The store capabilities are traits so deployments can point them at a real
//! graph or vector database. The `Memory*` adapters shipped here keep their
//! data in maps and optionally persist to a JSON file, which is what the
//! `biograph` binary uses for local runs.
//!
//! # Example
//!
//! ```rust,no_run
//! use biograph_db::{Database, GraphStore, EntityType};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::open("./data").await?;
//!     let papers = db.graph().count_by_type(EntityType::Paper).await?;
//!     println!("{papers} papers in the graph");
//!     Ok(())
//! }
//! ```

pub mod database;
pub mod error;
pub mod graph;
mod persist;
pub mod schema;
pub mod snapshot;
pub mod vectors;

pub use database::{Database, DatabaseStats};
pub use error::DbError;
pub use graph::{GraphStore, MemoryGraphStore};
pub use schema::{EntityType, GraphEntity, GraphRelationship, MergeStats, VectorRecord};
pub use snapshot::{DocumentSnapshot, SnapshotCounts};
pub use vectors::{MemoryVectorStore, VectorStore};
