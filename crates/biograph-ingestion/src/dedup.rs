//! Deduplication of collected records.
//!
//! Stage 1: natural key (PMID / NCBI gene id) exact match
//! Stage 2: DOI exact match, for papers that reappear under a second PMID

use std::collections::{BTreeMap, HashSet};

use biograph_common::{Gene, Paper};

/// How a record identifies itself for deduplication.
pub trait DedupKey {
    fn natural_key(&self) -> &str;

    fn doi(&self) -> Option<&str> {
        None
    }

    /// Fold a later duplicate into the record already kept.
    fn absorb(&mut self, _duplicate: Self)
    where
        Self: Sized,
    {
    }
}

impl DedupKey for Paper {
    fn natural_key(&self) -> &str {
        &self.pmid
    }

    fn doi(&self) -> Option<&str> {
        self.doi.as_deref()
    }
}

impl DedupKey for Gene {
    fn natural_key(&self) -> &str {
        &self.gene_id
    }

    /// The same gene comes back once per PMID page; keep every link.
    fn absorb(&mut self, duplicate: Self) {
        for pmid in duplicate.linked_pmids {
            if !self.linked_pmids.contains(&pmid) {
                self.linked_pmids.push(pmid);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupResult {
    New,
    DuplicateKey(String),
    DuplicateDoi(String),
}

/// Records accepted so far, in arrival order.
#[derive(Debug)]
pub struct SeenRecords<R> {
    records: Vec<R>,
    by_key: BTreeMap<String, usize>,
    dois: HashSet<String>,
}

impl<R> Default for SeenRecords<R> {
    fn default() -> Self {
        Self { records: Vec::new(), by_key: BTreeMap::new(), dois: HashSet::new() }
    }
}

impl<R: DedupKey> SeenRecords<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&self, incoming: &R) -> DedupResult {
        let key = incoming.natural_key();
        if self.by_key.contains_key(key) {
            return DedupResult::DuplicateKey(key.to_string());
        }
        if let Some(doi) = incoming.doi().map(normalise_doi) {
            if self.dois.contains(&doi) {
                return DedupResult::DuplicateDoi(doi);
            }
        }
        DedupResult::New
    }

    /// Keep `incoming` if it is new, otherwise fold it into the kept copy.
    pub fn insert(&mut self, incoming: R) -> DedupResult {
        let result = self.check(&incoming);
        match &result {
            DedupResult::New => {
                if let Some(doi) = incoming.doi().map(normalise_doi) {
                    self.dois.insert(doi);
                }
                self.by_key.insert(incoming.natural_key().to_string(), self.records.len());
                self.records.push(incoming);
            }
            DedupResult::DuplicateKey(key) => {
                if let Some(&idx) = self.by_key.get(key) {
                    self.records[idx].absorb(incoming);
                }
            }
            DedupResult::DuplicateDoi(_) => {}
        }
        result
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<R> {
        self.records
    }
}

fn normalise_doi(doi: &str) -> String {
    let d = doi.trim().to_ascii_lowercase();
    d.strip_prefix("https://doi.org/")
        .or_else(|| d.strip_prefix("doi:"))
        .map(str::to_string)
        .unwrap_or(d)
}
