//! Storage error types.

use biograph_common::BiographError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid embedding dimension for {id}: expected {expected}, got {actual}")]
    InvalidEmbeddingDimension { id: String, expected: usize, actual: usize },

    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

/// IO failures may clear up on retry; bad data never will.
impl From<DbError> for BiographError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Io(e) => BiographError::Store(e.to_string()),
            other => BiographError::Permanent(other.to_string()),
        }
    }
}
