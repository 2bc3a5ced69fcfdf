//! biograph-common: Shared types and errors used across all Biograph crates.

pub mod error;
pub mod entities;

// Re-export commonly used types
pub use error::{BiographError, ErrorClass, Result};
pub use entities::{Author, Gene, Paper, PaperDataset};
