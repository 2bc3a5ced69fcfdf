use async_trait::async_trait;
use biograph_common::{Gene, Paper, Result};
use biograph_db::EntityType;
use biograph_kg::{build_batch, merge_into_graph, rebuild_graph, GraphBatch, GraphMergeStats};

use super::set;
use crate::context::{Api, TaskContext};
use crate::task::{Counters, Dependency, Task};
use crate::tasks::{CollectFullDataset, CollectNewGenes, CollectNewPapers};

fn batch_counters(batch: &GraphBatch, counters: &mut Counters) {
    set(counters, "papers", batch.count(EntityType::Paper));
    set(counters, "genes", batch.count(EntityType::Gene));
    set(counters, "authors", batch.count(EntityType::Author));
    set(counters, "mesh_terms", batch.count(EntityType::MeshTerm));
}

fn merge_counters(stats: &GraphMergeStats, counters: &mut Counters) {
    set(counters, "entities_inserted", stats.entities.inserted);
    set(counters, "entities_updated", stats.entities.updated);
    set(counters, "entities_unchanged", stats.entities.unchanged);
    set(counters, "relationships_written", stats.relationships.written());
    set(counters, "relationships_unchanged", stats.relationships.unchanged);
}

/// Upserts this run's papers and genes. Never deletes.
pub struct MergeIntoGraph;

impl MergeIntoGraph {
    pub const NAME: &'static str = "merge-into-graph";
}

#[async_trait]
impl Task for MergeIntoGraph {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn dependencies(&self) -> Vec<Dependency> {
        vec![Dependency::hard(CollectNewPapers::NAME), Dependency::hard(CollectNewGenes::NAME)]
    }

    async fn run(&self, ctx: &TaskContext) -> Result<Counters> {
        let (papers, genes): (Vec<Paper>, Vec<Gene>) = {
            let batch = ctx.run().batch().await;
            (batch.papers.values().cloned().collect(), batch.genes.values().cloned().collect())
        };
        let graph_batch = build_batch(&papers, &genes);

        let mut counters = Counters::new();
        batch_counters(&graph_batch, &mut counters);
        let stats = merge_into_graph(
            ctx.services().graph.as_ref(),
            ctx.caller(Api::Stores),
            ctx.calls(Api::Stores),
            graph_batch,
            ctx.params().batch_size(),
        )
        .await?;
        merge_counters(&stats, &mut counters);
        Ok(counters)
    }
}

/// Clears the graph and reloads it from the whole snapshot.
pub struct RebuildGraph;

impl RebuildGraph {
    pub const NAME: &'static str = "rebuild-graph";
}

#[async_trait]
impl Task for RebuildGraph {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn dependencies(&self) -> Vec<Dependency> {
        vec![Dependency::hard(CollectFullDataset::NAME)]
    }

    async fn run(&self, ctx: &TaskContext) -> Result<Counters> {
        let dataset = ctx.services().snapshot.dataset().await;
        let papers: Vec<Paper> = dataset.papers.into_values().collect();
        let genes: Vec<Gene> = dataset.genes.into_values().collect();
        let graph_batch = build_batch(&papers, &genes);

        let mut counters = Counters::new();
        batch_counters(&graph_batch, &mut counters);
        let stats = rebuild_graph(
            ctx.services().graph.as_ref(),
            ctx.caller(Api::Stores),
            ctx.calls(Api::Stores),
            graph_batch,
            ctx.params().batch_size(),
        )
        .await?;
        merge_counters(&stats, &mut counters);
        Ok(counters)
    }
}
