use async_trait::async_trait;
use biograph_common::{BiographError, Paper, Result};
use biograph_db::{MergeStats, VectorRecord};
use serde_json::Value;
use tracing::debug;

use super::set;
use crate::context::{Api, TaskContext};
use crate::task::{Counters, Dependency, Task};
use crate::tasks::{CollectFullDataset, CollectNewPapers, MergeIntoGraph, RebuildGraph};

fn vector_record(paper: &Paper, vector: Vec<f32>) -> VectorRecord {
    let mut record = VectorRecord::new(paper.pmid.clone(), vector);
    record.payload.insert("title".into(), Value::from(paper.title.clone()));
    if let Some(journal) = &paper.journal {
        record.payload.insert("journal".into(), Value::from(journal.clone()));
    }
    if let Some(date) = paper.publication_date {
        record.payload.insert("publication_date".into(), Value::from(date.to_string()));
    }
    record
}

/// Embed `papers` chunk by chunk and upsert each chunk as soon as it is
/// embedded, so a failure late in the run keeps the earlier chunks.
async fn embed_and_upsert(ctx: &TaskContext, papers: &[Paper], counters: &mut Counters) -> Result<MergeStats> {
    let embedder = &ctx.services().embedder;
    let vectors = &ctx.services().vectors;
    let mut stats = MergeStats::default();

    for chunk in papers.chunks(ctx.params().batch_size()) {
        let texts: Vec<String> = chunk.iter().map(Paper::embedding_text).collect();
        let embedded = ctx
            .caller(Api::Embeddings)
            .call_tracked(ctx.calls(Api::Embeddings), || embedder.embed_batch(&texts))
            .await?;
        if embedded.len() != chunk.len() {
            return Err(BiographError::permanent(format!(
                "embedder returned {} vectors for {} texts",
                embedded.len(),
                chunk.len()
            )));
        }

        let records: Vec<VectorRecord> =
            chunk.iter().zip(embedded).map(|(paper, vector)| vector_record(paper, vector)).collect();
        let merged = ctx
            .caller(Api::Stores)
            .call_tracked(ctx.calls(Api::Stores), || vectors.upsert_vectors(records.clone()))
            .await?;
        debug!(task = %ctx.task(), chunk = chunk.len(), ?merged, "vector chunk stored");
        stats.add(merged);
    }

    set(counters, "papers_embedded", papers.len());
    set(counters, "vectors_inserted", stats.inserted);
    set(counters, "vectors_updated", stats.updated);
    set(counters, "vectors_unchanged", stats.unchanged);
    Ok(stats)
}

/// Upserts vectors for this run's papers, keyed by PMID.
pub struct MergeIntoVectorStore;

impl MergeIntoVectorStore {
    pub const NAME: &'static str = "merge-into-vector-store";
}

#[async_trait]
impl Task for MergeIntoVectorStore {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn dependencies(&self) -> Vec<Dependency> {
        vec![Dependency::hard(CollectNewPapers::NAME), Dependency::soft(MergeIntoGraph::NAME)]
    }

    async fn run(&self, ctx: &TaskContext) -> Result<Counters> {
        let papers: Vec<Paper> = ctx.run().batch().await.papers.values().cloned().collect();
        let mut counters = Counters::new();
        embed_and_upsert(ctx, &papers, &mut counters).await?;
        Ok(counters)
    }
}

pub struct RecreateVectorCollection;

impl RecreateVectorCollection {
    pub const NAME: &'static str = "recreate-vector-collection";
}

#[async_trait]
impl Task for RecreateVectorCollection {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn dependencies(&self) -> Vec<Dependency> {
        vec![Dependency::hard(CollectFullDataset::NAME), Dependency::soft(RebuildGraph::NAME)]
    }

    async fn run(&self, ctx: &TaskContext) -> Result<Counters> {
        let vectors = &ctx.services().vectors;
        let dropped = ctx
            .caller(Api::Stores)
            .call_tracked(ctx.calls(Api::Stores), || vectors.count())
            .await?;
        ctx.caller(Api::Stores)
            .call_tracked(ctx.calls(Api::Stores), || vectors.recreate_collection())
            .await?;

        let mut counters = Counters::new();
        set(&mut counters, "vectors_dropped", dropped);
        Ok(counters)
    }
}

/// Embeds every paper in the snapshot into the fresh collection.
pub struct ReingestAllVectors;

impl ReingestAllVectors {
    pub const NAME: &'static str = "reingest-all-vectors";
}

#[async_trait]
impl Task for ReingestAllVectors {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn dependencies(&self) -> Vec<Dependency> {
        vec![Dependency::hard(RecreateVectorCollection::NAME)]
    }

    async fn run(&self, ctx: &TaskContext) -> Result<Counters> {
        let papers = ctx.services().snapshot.papers().await;
        let mut counters = Counters::new();
        embed_and_upsert(ctx, &papers, &mut counters).await?;
        Ok(counters)
    }
}
