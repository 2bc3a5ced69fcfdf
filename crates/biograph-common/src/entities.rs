/// Core record types shared by the snapshot, the graph mapping and the
/// vector payloads. Natural keys: `Paper::pmid`, `Gene::gene_id`.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Paper
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paper {
    pub pmid: String,
    pub title: String,
    #[serde(default)]
    pub abstract_text: Option<String>,
    #[serde(default)]
    pub authors: Vec<Author>,
    #[serde(default)]
    pub journal: Option<String>,
    #[serde(default)]
    pub publication_date: Option<NaiveDate>,
    #[serde(default)]
    pub doi: Option<String>,
    #[serde(default)]
    pub mesh_terms: Vec<String>,
    /// PMIDs cited by this paper.
    #[serde(default)]
    pub references: Vec<String>,
}

impl Paper {
    pub fn new(pmid: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            pmid: pmid.into(),
            title: title.into(),
            abstract_text: None,
            authors: vec![],
            journal: None,
            publication_date: None,
            doi: None,
            mesh_terms: vec![],
            references: vec![],
        }
    }

    /// Text used for embedding: title plus abstract when present.
    pub fn embedding_text(&self) -> String {
        match self.abstract_text.as_deref() {
            Some(abs) if !abs.trim().is_empty() => format!("{}\n\n{}", self.title, abs),
            _ => self.title.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    #[serde(default)]
    pub affiliation: Option<String>,
}

impl Author {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), affiliation: None }
    }

    /// Lower-cased, whitespace-collapsed name used as the author's key.
    pub fn normalised_name(&self) -> String {
        self.name
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }
}

// ---------------------------------------------------------------------------
// Gene
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gene {
    /// NCBI Gene ID.
    pub gene_id: String,
    pub symbol: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub organism: Option<String>,
    /// Papers this gene was linked from.
    #[serde(default)]
    pub linked_pmids: Vec<String>,
}

impl Gene {
    pub fn new(gene_id: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            gene_id: gene_id.into(),
            symbol: symbol.into(),
            description: None,
            organism: None,
            linked_pmids: vec![],
        }
    }
}

// ---------------------------------------------------------------------------
// Dataset
// ---------------------------------------------------------------------------

/// A full set of papers and genes, keyed by natural key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaperDataset {
    #[serde(default)]
    pub papers: BTreeMap<String, Paper>,
    #[serde(default)]
    pub genes: BTreeMap<String, Gene>,
}

impl PaperDataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(papers: Vec<Paper>, genes: Vec<Gene>) -> Self {
        Self {
            papers: papers.into_iter().map(|p| (p.pmid.clone(), p)).collect(),
            genes: genes.into_iter().map(|g| (g.gene_id.clone(), g)).collect(),
        }
    }

    pub fn paper(&self, pmid: &str) -> Option<&Paper> {
        self.papers.get(pmid)
    }

    pub fn gene(&self, gene_id: &str) -> Option<&Gene> {
        self.genes.get(gene_id)
    }

    pub fn is_empty(&self) -> bool {
        self.papers.is_empty() && self.genes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_text_includes_abstract() {
        let mut p = Paper::new("1", "CRISPR screens in KRAS-mutant cells");
        assert_eq!(p.embedding_text(), "CRISPR screens in KRAS-mutant cells");
        p.abstract_text = Some("We performed genome-wide screens.".to_string());
        assert!(p.embedding_text().contains("genome-wide"));
    }

    #[test]
    fn test_author_normalised_name() {
        let a = Author::new("  Jennifer   A. Doudna ");
        assert_eq!(a.normalised_name(), "jennifer a. doudna");
    }

    #[test]
    fn test_dataset_keys_by_natural_key() {
        let ds = PaperDataset::from_records(
            vec![Paper::new("10", "a"), Paper::new("10", "a (revised)")],
            vec![Gene::new("3845", "KRAS")],
        );
        assert_eq!(ds.papers.len(), 1);
        assert_eq!(ds.paper("10").map(|p| p.title.as_str()), Some("a (revised)"));
        assert_eq!(ds.gene("3845").map(|g| g.symbol.as_str()), Some("KRAS"));
    }

    #[test]
    fn test_paper_deserializes_with_missing_optional_fields() {
        let p: Paper = serde_json::from_str(r#"{"pmid":"42","title":"t"}"#).unwrap();
        assert!(p.authors.is_empty());
        assert!(p.references.is_empty());
    }
}
