use async_trait::async_trait;
use biograph_common::{BiographError, Gene, Paper, PaperDataset, Result};
use biograph_ingestion::SeenRecords;
use tracing::{info, warn};

use super::set;
use crate::context::{Api, TaskContext};
use crate::task::{Counters, Dependency, Task};
use crate::tasks::ValidateConfiguration;

/// Papers for every search term, de-duplicated across terms.
async fn collect_papers(ctx: &TaskContext, counters: &mut Counters) -> Result<Vec<Paper>> {
    let params = ctx.params();
    let max_results = params.max_results_per_term();
    let mut seen = SeenRecords::new();
    let (mut pages, mut duplicates, mut truncated) = (0, 0, 0);

    for term in &params.search_terms {
        let outcome = ctx
            .services()
            .papers
            .collect_into(&mut seen, term, max_results, ctx.calls(Api::Literature))
            .await?;
        pages += outcome.pages;
        duplicates += outcome.duplicates;
        truncated += usize::from(outcome.truncated);
        info!(task = %ctx.task(), term = %term, added = outcome.added, "search term collected");
    }

    set(counters, "search_terms", params.search_terms.len());
    set(counters, "pages", pages);
    set(counters, "duplicates", duplicates);
    set(counters, "truncated_terms", truncated);
    set(counters, "papers_collected", seen.len());
    Ok(seen.into_records())
}

/// Genes linked to `pmids`. No calls are made for an empty list.
async fn collect_genes(ctx: &TaskContext, pmids: &[String], counters: &mut Counters) -> Result<Vec<Gene>> {
    if pmids.is_empty() {
        set(counters, "genes_collected", 0);
        return Ok(Vec::new());
    }
    let query = pmids.join(",");
    let (genes, outcome) = ctx
        .services()
        .genes
        .collect(&query, usize::MAX, ctx.calls(Api::Genes))
        .await?;
    set(counters, "gene_pages", outcome.pages);
    set(counters, "genes_collected", genes.len());
    Ok(genes)
}

pub struct CollectNewPapers;

impl CollectNewPapers {
    pub const NAME: &'static str = "collect-new-papers";
}

#[async_trait]
impl Task for CollectNewPapers {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn run(&self, ctx: &TaskContext) -> Result<Counters> {
        let mut counters = Counters::new();
        let papers = collect_papers(ctx, &mut counters).await?;

        let merged = ctx.services().snapshot.merge_papers(papers.clone()).await?;
        set(&mut counters, "snapshot_inserted", merged.inserted);
        set(&mut counters, "snapshot_updated", merged.updated);
        set(&mut counters, "snapshot_unchanged", merged.unchanged);

        let mut batch = ctx.run().batch().await;
        for paper in papers {
            batch.papers.insert(paper.pmid.clone(), paper);
        }
        Ok(counters)
    }
}

pub struct CollectNewGenes;

impl CollectNewGenes {
    pub const NAME: &'static str = "collect-new-genes";
}

#[async_trait]
impl Task for CollectNewGenes {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn dependencies(&self) -> Vec<Dependency> {
        vec![Dependency::hard(CollectNewPapers::NAME)]
    }

    async fn run(&self, ctx: &TaskContext) -> Result<Counters> {
        let pmids: Vec<String> = ctx.run().batch().await.papers.keys().cloned().collect();
        let mut counters = Counters::new();
        let genes = collect_genes(ctx, &pmids, &mut counters).await?;

        let merged = ctx.services().snapshot.merge_genes(genes.clone()).await?;
        set(&mut counters, "snapshot_inserted", merged.inserted);
        set(&mut counters, "snapshot_updated", merged.updated);
        set(&mut counters, "snapshot_unchanged", merged.unchanged);

        let mut batch = ctx.run().batch().await;
        for gene in genes {
            batch.genes.insert(gene.gene_id.clone(), gene);
        }
        Ok(counters)
    }
}

/// Collects papers and genes, then replaces the snapshot wholesale.
pub struct CollectFullDataset;

impl CollectFullDataset {
    pub const NAME: &'static str = "collect-full-dataset";
}

#[async_trait]
impl Task for CollectFullDataset {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn dependencies(&self) -> Vec<Dependency> {
        vec![Dependency::hard(ValidateConfiguration::NAME)]
    }

    async fn run(&self, ctx: &TaskContext) -> Result<Counters> {
        let mut counters = Counters::new();
        let papers = collect_papers(ctx, &mut counters).await?;
        if papers.is_empty() {
            warn!(task = %ctx.task(), "full collection returned nothing");
            return Err(BiographError::permanent(
                "full collection returned no papers; keeping the existing snapshot",
            ));
        }
        let pmids: Vec<String> = papers.iter().map(|p| p.pmid.clone()).collect();
        let genes = collect_genes(ctx, &pmids, &mut counters).await?;

        let dataset = PaperDataset::from_records(papers, genes);
        let counts = ctx.services().snapshot.replace_all(dataset.clone()).await?;
        set(&mut counters, "snapshot_papers", counts.papers);
        set(&mut counters, "snapshot_genes", counts.genes);

        *ctx.run().batch().await = dataset;
        Ok(counters)
    }
}
