//! NCBI Gene client.
//!
//! Genes are collected for a list of PMIDs rather than a free-text term:
//!   elink:    pubmed → gene links, one linkset per PMID
//!   esummary: symbol, description and organism for the linked gene ids
//!
//! The query is a comma- or whitespace-separated PMID list and the cursor is
//! an offset into that list.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use async_trait::async_trait;
use biograph_common::{BiographError, Gene, Result};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument};

use super::{parse_offset, NcbiConfig, Page, RecordSource};
use crate::http::{build_client, check_status, map_reqwest_error};

pub struct GeneSource {
    client: reqwest::Client,
    config: NcbiConfig,
}

#[derive(Debug, Deserialize)]
struct ELinkResponse {
    #[serde(default)]
    linksets: Vec<LinkSet>,
}

#[derive(Debug, Deserialize)]
struct LinkSet {
    #[serde(default)]
    ids: Vec<Value>,
    #[serde(default)]
    linksetdbs: Vec<LinkSetDb>,
}

#[derive(Debug, Deserialize)]
struct LinkSetDb {
    #[serde(default)]
    linkname: String,
    #[serde(default)]
    links: Vec<Value>,
}

impl GeneSource {
    pub fn new(config: NcbiConfig) -> Result<Self> {
        let client = build_client(Duration::from_secs(config.timeout_secs))?;
        Ok(Self { client, config })
    }

    /// gene id → PMIDs that link to it.
    #[instrument(skip(self, pmids), fields(n = pmids.len()))]
    async fn elink(&self, pmids: &[String]) -> Result<BTreeMap<String, BTreeSet<String>>> {
        let mut params = self.config.identity_params();
        params.push(("dbfrom", "pubmed".to_string()));
        params.push(("db", "gene".to_string()));
        params.push(("linkname", "pubmed_gene".to_string()));
        params.push(("retmode", "json".to_string()));
        for pmid in pmids {
            params.push(("id", pmid.clone()));
        }

        let resp = self
            .client
            .get(self.config.endpoint("elink.fcgi"))
            .query(&params)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let body: ELinkResponse = check_status(resp)
            .await?
            .json()
            .await
            .map_err(map_reqwest_error)?;
        Ok(parse_linksets(body))
    }

    #[instrument(skip(self, gene_ids), fields(n = gene_ids.len()))]
    async fn esummary(&self, gene_ids: &[String]) -> Result<Value> {
        let mut params = self.config.identity_params();
        params.push(("db", "gene".to_string()));
        params.push(("id", gene_ids.join(",")));
        params.push(("retmode", "json".to_string()));

        let resp = self
            .client
            .get(self.config.endpoint("esummary.fcgi"))
            .query(&params)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        check_status(resp).await?.json().await.map_err(map_reqwest_error)
    }
}

#[async_trait]
impl RecordSource<Gene> for GeneSource {
    fn name(&self) -> &str {
        "ncbi-gene"
    }

    async fn fetch(&self, query: &str, cursor: Option<&str>) -> Result<Page<Gene>> {
        let pmids = split_pmids(query);
        let offset = parse_offset(cursor)?;
        let page_size = self.config.page_size.max(1);
        if offset >= pmids.len() {
            return Ok(Page::last(vec![]));
        }
        let end = (offset + page_size).min(pmids.len());

        let links = self.elink(&pmids[offset..end]).await?;
        let genes = if links.is_empty() {
            vec![]
        } else {
            let ids: Vec<String> = links.keys().cloned().collect();
            let summary = self.esummary(&ids).await?;
            parse_gene_summary(&summary, &links)?
        };
        debug!(pmids = end - offset, genes = genes.len(), "gene page");

        if end < pmids.len() {
            Ok(Page::with_next(genes, end.to_string()))
        } else {
            Ok(Page::last(genes))
        }
    }
}

pub fn split_pmids(query: &str) -> Vec<String> {
    query
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn json_id(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_linksets(body: ELinkResponse) -> BTreeMap<String, BTreeSet<String>> {
    let mut links: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for set in body.linksets {
        let pmids: Vec<String> = set.ids.iter().filter_map(json_id).collect();
        for db in set.linksetdbs.iter().filter(|d| d.linkname == "pubmed_gene") {
            for gene_id in db.links.iter().filter_map(json_id) {
                links.entry(gene_id).or_default().extend(pmids.iter().cloned());
            }
        }
    }
    links
}

fn parse_gene_summary(summary: &Value, links: &BTreeMap<String, BTreeSet<String>>) -> Result<Vec<Gene>> {
    let result = summary
        .get("result")
        .ok_or_else(|| BiographError::permanent("esummary response has no result"))?;

    let mut genes = Vec::new();
    for (gene_id, pmids) in links {
        let Some(doc) = result.get(gene_id) else { continue };
        if doc.get("error").is_some() {
            continue;
        }
        let Some(symbol) = doc.get("name").and_then(Value::as_str).filter(|s| !s.is_empty()) else {
            continue;
        };
        let mut gene = Gene::new(gene_id.clone(), symbol);
        gene.description = doc
            .get("description")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(String::from);
        gene.organism = doc
            .pointer("/organism/scientificname")
            .and_then(Value::as_str)
            .map(String::from);
        gene.linked_pmids = pmids.iter().cloned().collect();
        genes.push(gene);
    }
    Ok(genes)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_split_pmids() {
        assert_eq!(split_pmids("1, 2\n3,,"), vec!["1", "2", "3"]);
        assert!(split_pmids("  ").is_empty());
    }

    #[test]
    fn test_linksets_group_pmids_by_gene() {
        let body: ELinkResponse = serde_json::from_value(json!({
            "linksets": [
                {"dbfrom": "pubmed", "ids": ["10"], "linksetdbs": [
                    {"dbto": "gene", "linkname": "pubmed_gene", "links": ["3845", "7157"]}
                ]},
                {"dbfrom": "pubmed", "ids": [11], "linksetdbs": [
                    {"dbto": "gene", "linkname": "pubmed_gene", "links": [3845]}
                ]},
                {"dbfrom": "pubmed", "ids": ["12"]}
            ]
        }))
        .unwrap();
        let links = parse_linksets(body);
        assert_eq!(links.len(), 2);
        assert_eq!(links["3845"].iter().cloned().collect::<Vec<_>>(), vec!["10", "11"]);
        assert_eq!(links["7157"].len(), 1);
    }

    #[test]
    fn test_summary_builds_genes() {
        let summary = json!({
            "result": {
                "uids": ["3845", "1"],
                "3845": {
                    "uid": "3845",
                    "name": "KRAS",
                    "description": "KRAS proto-oncogene, GTPase",
                    "organism": {"scientificname": "Homo sapiens", "taxid": 9606}
                },
                "1": {"uid": "1", "error": "cannot get document summary"}
            }
        });
        let mut links = BTreeMap::new();
        links.insert("3845".to_string(), BTreeSet::from(["10".to_string()]));
        links.insert("1".to_string(), BTreeSet::from(["10".to_string()]));

        let genes = parse_gene_summary(&summary, &links).unwrap();
        assert_eq!(genes.len(), 1);
        assert_eq!(genes[0].symbol, "KRAS");
        assert_eq!(genes[0].organism.as_deref(), Some("Homo sapiens"));
        assert_eq!(genes[0].linked_pmids, vec!["10".to_string()]);
    }

    #[test]
    fn test_summary_without_result_is_permanent() {
        let err = parse_gene_summary(&json!({"error": "x"}), &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, BiographError::Permanent(_)));
    }
}
