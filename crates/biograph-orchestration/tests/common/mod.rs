#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use biograph_common::{Author, BiographError, Gene, Paper, Result};
use biograph_db::Database;
use biograph_ingestion::{Embedder, Page, RecordSource};
use biograph_orchestration::{ApiCallers, ConfigCheck, Orchestrator, OrchestratorConfig, RateLimits, Services};
use biograph_resilience::RateLimitConfig;

#[derive(Debug, Clone, Copy)]
pub enum Failure {
    Transient,
    Permanent,
}

impl Failure {
    fn error(self) -> BiographError {
        match self {
            Failure::Transient => BiographError::transient("503 Service Unavailable"),
            Failure::Permanent => BiographError::permanent("400 Bad Request"),
        }
    }
}

pub fn paper(pmid: &str) -> Paper {
    let mut p = Paper::new(pmid, format!("Paper {pmid}"));
    p.abstract_text = Some(format!("Abstract of {pmid}"));
    p.authors = vec![Author::new("Jane Doe")];
    p.mesh_terms = vec!["Neoplasms".to_string()];
    p
}

/// Serves fixed pages; the cursor is the page index. Failures are one-shot
/// and keyed by the page they hit.
pub struct MockPapers {
    pages: Vec<Vec<Paper>>,
    failures: Mutex<BTreeMap<usize, VecDeque<Failure>>>,
    pub calls: AtomicUsize,
}

impl MockPapers {
    pub fn new(pages: Vec<Vec<&str>>) -> Self {
        Self {
            pages: pages.into_iter().map(|ids| ids.into_iter().map(paper).collect()).collect(),
            failures: Mutex::new(BTreeMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn fail_page(self, page: usize, failure: Failure) -> Self {
        self.failures.lock().unwrap().entry(page).or_default().push_back(failure);
        self
    }
}

#[async_trait]
impl RecordSource<Paper> for MockPapers {
    fn name(&self) -> &str {
        "mock-pubmed"
    }

    async fn fetch(&self, _query: &str, cursor: Option<&str>) -> Result<Page<Paper>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let index: usize = cursor.map(|c| c.parse().unwrap()).unwrap_or(0);
        if let Some(failure) = self.failures.lock().unwrap().get_mut(&index).and_then(VecDeque::pop_front) {
            return Err(failure.error());
        }
        let records = self.pages.get(index).cloned().unwrap_or_default();
        if index + 1 < self.pages.len() {
            Ok(Page::with_next(records, (index + 1).to_string()))
        } else {
            Ok(Page::last(records))
        }
    }
}

/// Returns the configured genes that link to any PMID in the query.
pub struct MockGenes {
    genes: Vec<Gene>,
    failure: Option<Failure>,
}

impl MockGenes {
    pub fn new(genes: &[(&str, &str, &[&str])]) -> Self {
        let genes = genes
            .iter()
            .map(|(id, symbol, pmids)| {
                let mut g = Gene::new(*id, *symbol);
                g.linked_pmids = pmids.iter().map(|p| p.to_string()).collect();
                g
            })
            .collect();
        Self { genes, failure: None }
    }

    pub fn failing(failure: Failure) -> Self {
        Self { genes: Vec::new(), failure: Some(failure) }
    }
}

#[async_trait]
impl RecordSource<Gene> for MockGenes {
    fn name(&self) -> &str {
        "mock-gene"
    }

    async fn fetch(&self, query: &str, _cursor: Option<&str>) -> Result<Page<Gene>> {
        if let Some(failure) = self.failure {
            return Err(failure.error());
        }
        let wanted: Vec<&str> = query.split(',').collect();
        let genes = self
            .genes
            .iter()
            .filter_map(|g| {
                let linked: Vec<String> =
                    g.linked_pmids.iter().filter(|p| wanted.contains(&p.as_str())).cloned().collect();
                (!linked.is_empty()).then(|| Gene { linked_pmids: linked, ..g.clone() })
            })
            .collect();
        Ok(Page::last(genes))
    }
}

/// Deterministic 4-dimensional vectors derived from the text.
pub struct MockEmbedder {
    pub calls: AtomicUsize,
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self { calls: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    fn dimension(&self) -> usize {
        4
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|t| {
                let sum: u32 = t.bytes().map(u32::from).sum();
                vec![t.len() as f32, (sum % 97) as f32, 1.0, 0.5]
            })
            .collect())
    }
}

pub fn fast(retry_attempts: u32) -> RateLimitConfig {
    RateLimitConfig {
        requests_per_second: 1000.0,
        requests_per_minute: 100_000,
        burst_size: 1000,
        ..RateLimitConfig::default().with_retry_attempts(retry_attempts)
    }
}

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub db: Database,
    pub papers: Arc<MockPapers>,
    pub embedder: Arc<MockEmbedder>,
}

pub fn harness(papers: MockPapers, genes: MockGenes) -> Harness {
    harness_with(papers, genes, Vec::new())
}

pub fn harness_with(papers: MockPapers, genes: MockGenes, checks: Vec<ConfigCheck>) -> Harness {
    let limits = RateLimits { literature: fast(3), genes: fast(3), embeddings: fast(3), stores: fast(3) };
    let callers = ApiCallers::new(&limits).unwrap();
    let db = Database::in_memory();
    let papers = Arc::new(papers);
    let embedder = Arc::new(MockEmbedder::new());
    let services = Services::new(papers.clone(), Arc::new(genes), embedder.clone(), &db, &callers);
    let config = OrchestratorConfig {
        max_concurrency: 2,
        max_results: None,
        search_terms: vec!["tp53".to_string()],
    };
    let orchestrator = Orchestrator::new(config, services, callers).with_config_checks(checks);
    Harness { orchestrator, db, papers, embedder }
}
