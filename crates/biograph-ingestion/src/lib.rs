//! biograph-ingestion: Collecting records from rate-limited external APIs.
//! - Record sources (PubMed E-utilities, NCBI Gene)
//! - Embedding backend (OpenAI-compatible `/v1/embeddings`)
//! - Paginated, de-duplicating collector driven through a `ResilientCaller`

pub mod collector;
pub mod dedup;
pub mod embedding;
pub mod http;
pub mod sources;

pub use collector::{CollectOutcome, Collector};
pub use dedup::{DedupKey, DedupResult, SeenRecords};
pub use embedding::{Embedder, EmbeddingConfig, HttpEmbedder};
pub use sources::ncbi_gene::GeneSource;
pub use sources::pubmed::PubMedSource;
pub use sources::{NcbiConfig, Page, RecordSource};
