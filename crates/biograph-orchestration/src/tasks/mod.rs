//! The concrete tasks the workflows are assembled from.

mod collect;
mod graph;
mod validate;
mod vectors;

pub use collect::{CollectFullDataset, CollectNewGenes, CollectNewPapers};
pub use graph::{MergeIntoGraph, RebuildGraph};
pub use validate::{ConfigCheck, ValidateConfiguration, ValidateConsistency};
pub use vectors::{MergeIntoVectorStore, RecreateVectorCollection, ReingestAllVectors};

use crate::task::Counters;

fn set(counters: &mut Counters, key: &str, value: usize) {
    counters.insert(key.to_string(), value as u64);
}
