//! External record sources.

pub mod ncbi_gene;
pub mod pubmed;

use async_trait::async_trait;
use biograph_common::Result;

/// One page of results plus the cursor for the next page, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<R> {
    pub records: Vec<R>,
    pub next_cursor: Option<String>,
}

impl<R> Page<R> {
    pub fn last(records: Vec<R>) -> Self {
        Self { records, next_cursor: None }
    }

    pub fn with_next(records: Vec<R>, cursor: impl Into<String>) -> Self {
        Self { records, next_cursor: Some(cursor.into()) }
    }
}

/// Common interface for paginated API clients.
///
/// Implementations must report retryable failures (5xx, 429, timeouts) as
/// `BiographError::Transient` and everything else as `Permanent`; the
/// collector relies on that split. `fetch` is called again with the same
/// arguments on retry, so it must not advance any internal state.
#[async_trait]
pub trait RecordSource<R>: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    async fn fetch(&self, query: &str, cursor: Option<&str>) -> Result<Page<R>>;
}

/// Offset cursors are plain decimal strings.
pub(crate) fn parse_offset(cursor: Option<&str>) -> Result<usize> {
    match cursor {
        None => Ok(0),
        Some(c) => c
            .parse()
            .map_err(|_| biograph_common::BiographError::permanent(format!("invalid cursor {c:?}"))),
    }
}

// ── NCBI E-utilities settings ────────────────────────────────────────────────

pub const EUTILS_BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

/// Settings shared by the E-utilities clients. NCBI asks every client to
/// identify itself with `tool` and a contact `email`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NcbiConfig {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_tool")]
    pub tool: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_tool()         -> String { "biograph".to_string() }
fn default_base_url()     -> String { EUTILS_BASE_URL.to_string() }
fn default_page_size()    -> usize  { 20 }
fn default_timeout_secs() -> u64    { 30 }

impl Default for NcbiConfig {
    fn default() -> Self {
        Self {
            email: String::new(),
            api_key: None,
            tool: default_tool(),
            base_url: default_base_url(),
            page_size: default_page_size(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl NcbiConfig {
    pub(crate) fn identity_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("tool", self.tool.clone())];
        if !self.email.is_empty() {
            params.push(("email", self.email.clone()));
        }
        if let Some(key) = self.api_key.as_ref().filter(|k| !k.is_empty()) {
            params.push(("api_key", key.clone()));
        }
        params
    }

    pub(crate) fn endpoint(&self, name: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), name)
    }
}
