//! PubMed E-utilities client.
//!
//! Endpoints used:
//!   esearch: PMIDs for a term, paged with `retstart` / `retmax`
//!   efetch:  article XML for a batch of PMIDs
//!
//! The page cursor is the `retstart` offset of the next page.

use std::time::Duration;

use async_trait::async_trait;
use biograph_common::{Author, BiographError, Paper, Result};
use chrono::NaiveDate;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use super::{parse_offset, NcbiConfig, Page, RecordSource};
use crate::http::{build_client, check_status, map_reqwest_error};

pub struct PubMedSource {
    client: reqwest::Client,
    config: NcbiConfig,
}

#[derive(Debug, Deserialize)]
struct ESearchResponse {
    esearchresult: ESearchResult,
}

#[derive(Debug, Deserialize)]
struct ESearchResult {
    #[serde(default)]
    count: Option<String>,
    #[serde(default)]
    idlist: Vec<String>,
    #[serde(rename = "ERROR", default)]
    error: Option<String>,
}

impl PubMedSource {
    pub fn new(config: NcbiConfig) -> Result<Self> {
        let client = build_client(Duration::from_secs(config.timeout_secs))?;
        Ok(Self { client, config })
    }

    /// Returns one page of PMIDs plus the total hit count.
    #[instrument(skip(self))]
    async fn esearch(&self, term: &str, retstart: usize) -> Result<(Vec<String>, usize)> {
        let mut params = self.config.identity_params();
        params.push(("db", "pubmed".to_string()));
        params.push(("term", term.to_string()));
        params.push(("retstart", retstart.to_string()));
        params.push(("retmax", self.config.page_size.max(1).to_string()));
        params.push(("retmode", "json".to_string()));

        let resp = self
            .client
            .get(self.config.endpoint("esearch.fcgi"))
            .query(&params)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let body: ESearchResponse = check_status(resp)
            .await?
            .json()
            .await
            .map_err(map_reqwest_error)?;

        if let Some(err) = body.esearchresult.error {
            return Err(BiographError::permanent(format!("esearch rejected query: {err}")));
        }
        let total = body
            .esearchresult
            .count
            .as_deref()
            .and_then(|c| c.parse().ok())
            .unwrap_or(0);
        debug!(ids = body.esearchresult.idlist.len(), total, "PubMed esearch page");
        Ok((body.esearchresult.idlist, total))
    }

    #[instrument(skip(self, pmids), fields(n = pmids.len()))]
    async fn efetch(&self, pmids: &[String]) -> Result<Vec<Paper>> {
        if pmids.is_empty() {
            return Ok(vec![]);
        }
        let mut params = self.config.identity_params();
        params.push(("db", "pubmed".to_string()));
        params.push(("id", pmids.join(",")));
        params.push(("rettype", "abstract".to_string()));
        params.push(("retmode", "xml".to_string()));

        let resp = self
            .client
            .get(self.config.endpoint("efetch.fcgi"))
            .query(&params)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let xml = check_status(resp)
            .await?
            .text()
            .await
            .map_err(map_reqwest_error)?;

        parse_pubmed_xml(&xml)
    }
}

#[async_trait]
impl RecordSource<Paper> for PubMedSource {
    fn name(&self) -> &str {
        "pubmed"
    }

    async fn fetch(&self, query: &str, cursor: Option<&str>) -> Result<Page<Paper>> {
        let offset = parse_offset(cursor)?;
        let (ids, total) = self.esearch(query, offset).await?;
        if ids.is_empty() {
            return Ok(Page::last(vec![]));
        }
        let next = offset + ids.len();
        let papers = self.efetch(&ids).await?;
        if next < total {
            Ok(Page::with_next(papers, next.to_string()))
        } else {
            Ok(Page::last(papers))
        }
    }
}

// ── XML parsing ──────────────────────────────────────────────────────────────

#[derive(Default)]
struct ArticleBuilder {
    pmid: Option<String>,
    title: String,
    abstract_parts: Vec<String>,
    authors: Vec<Author>,
    journal: Option<String>,
    year: Option<i32>,
    month: Option<u32>,
    day: Option<u32>,
    doi: Option<String>,
    mesh_terms: Vec<String>,
    references: Vec<String>,
    // Author in progress
    last_name: String,
    fore_name: String,
    collective_name: String,
    affiliation: Option<String>,
}

impl ArticleBuilder {
    fn finish_author(&mut self) {
        let name = if !self.collective_name.is_empty() {
            std::mem::take(&mut self.collective_name)
        } else if self.fore_name.is_empty() {
            std::mem::take(&mut self.last_name)
        } else {
            format!("{} {}", self.fore_name, self.last_name)
        };
        self.last_name.clear();
        self.fore_name.clear();
        let affiliation = self.affiliation.take();
        if !name.trim().is_empty() {
            self.authors.push(Author { name, affiliation });
        }
    }

    fn build(self) -> Option<Paper> {
        let pmid = self.pmid?;
        let title = collapse_whitespace(&self.title);
        if title.is_empty() {
            return None;
        }
        let abstract_text = self
            .abstract_parts
            .iter()
            .map(|p| collapse_whitespace(p))
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        let publication_date = self
            .year
            .and_then(|y| NaiveDate::from_ymd_opt(y, self.month.unwrap_or(1), self.day.unwrap_or(1)));

        let mut paper = Paper::new(pmid, title);
        paper.abstract_text = (!abstract_text.is_empty()).then_some(abstract_text);
        paper.authors = self.authors;
        paper.journal = self.journal;
        paper.publication_date = publication_date;
        paper.doi = self.doi;
        paper.mesh_terms = self.mesh_terms;
        paper.references = self.references;
        Some(paper)
    }
}

/// Parse efetch XML (`<PubmedArticleSet><PubmedArticle>...`) into papers.
/// Articles without a PMID or title are skipped.
pub fn parse_pubmed_xml(xml: &str) -> Result<Vec<Paper>> {
    let mut papers = Vec::new();
    let mut reader = Reader::from_str(xml);

    let mut path: Vec<String> = Vec::new();
    let mut current: Option<ArticleBuilder> = None;
    let mut id_type: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = element_name(e);
                match name.as_str() {
                    "PubmedArticle" => current = Some(ArticleBuilder::default()),
                    "AbstractText" => {
                        if let Some(a) = current.as_mut() {
                            a.abstract_parts.push(String::new());
                        }
                    }
                    "ArticleId" => id_type = attribute(e, "IdType"),
                    "ELocationID" => id_type = attribute(e, "EIdType"),
                    _ => {}
                }
                path.push(name);
            }
            Ok(Event::Text(ref e)) => {
                let Some(article) = current.as_mut() else {
                    buf.clear();
                    continue;
                };
                let raw = e.unescape().map_err(|err| {
                    BiographError::permanent(format!("bad text in PubMed XML: {err}"))
                })?;
                apply_text(article, &path, id_type.as_deref(), &raw);
            }
            Ok(Event::End(_)) => {
                let closed = path.pop().unwrap_or_default();
                match closed.as_str() {
                    "Author" => {
                        if let Some(a) = current.as_mut() {
                            a.finish_author();
                        }
                    }
                    "ArticleId" | "ELocationID" => id_type = None,
                    "PubmedArticle" => {
                        if let Some(article) = current.take() {
                            match article.build() {
                                Some(p) => papers.push(p),
                                None => warn!("skipping PubMed article without PMID or title"),
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(BiographError::permanent(format!(
                    "malformed PubMed XML at byte {}: {e}",
                    reader.buffer_position()
                )));
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(papers)
}

fn apply_text(article: &mut ArticleBuilder, path: &[String], id_type: Option<&str>, raw: &str) {
    let top = path.last().map(String::as_str).unwrap_or("");
    let parent = path.len().checked_sub(2).map(|i| path[i].as_str()).unwrap_or("");
    let within = |name: &str| path.iter().any(|p| p == name);
    let text = raw.trim();

    if within("ArticleTitle") {
        article.title.push_str(raw);
    } else if within("AbstractText") {
        if let Some(part) = article.abstract_parts.last_mut() {
            part.push_str(raw);
        }
    } else if text.is_empty() {
        // whitespace between elements
    } else if top == "PMID" && parent == "MedlineCitation" {
        if article.pmid.is_none() {
            article.pmid = Some(text.to_string());
        }
    } else if within("Author") && within("AuthorList") {
        match top {
            "LastName" => article.last_name = text.to_string(),
            "ForeName" => article.fore_name = text.to_string(),
            "CollectiveName" => article.collective_name = text.to_string(),
            "Affiliation" if article.affiliation.is_none() => {
                article.affiliation = Some(text.to_string())
            }
            _ => {}
        }
    } else if top == "Title" && parent == "Journal" {
        article.journal = Some(text.to_string());
    } else if within("PubDate") && within("JournalIssue") {
        match top {
            "Year" => article.year = text.parse().ok(),
            "Month" => article.month = parse_month(text),
            "Day" => article.day = text.parse().ok(),
            "MedlineDate" => article.year = text.get(..4).and_then(|y| y.parse().ok()),
            _ => {}
        }
    } else if top == "DescriptorName" && within("MeshHeading") {
        article.mesh_terms.push(text.to_string());
    } else if top == "ArticleId" {
        if within("Reference") {
            if id_type == Some("pubmed") {
                article.references.push(text.to_string());
            }
        } else if within("PubmedData") && id_type == Some("doi") {
            article.doi = Some(text.to_string());
        }
    } else if top == "ELocationID" && id_type == Some("doi") && article.doi.is_none() {
        article.doi = Some(text.to_string());
    }
}

fn element_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

fn attribute(e: &BytesStart<'_>, name: &str) -> Option<String> {
    e.try_get_attribute(name)
        .ok()
        .flatten()
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

fn parse_month(text: &str) -> Option<u32> {
    if let Ok(n) = text.parse::<u32>() {
        return (1..=12).contains(&n).then_some(n);
    }
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    let prefix = text.get(..3)?.to_ascii_lowercase();
    MONTHS.iter().position(|m| *m == prefix).map(|i| i as u32 + 1)
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
