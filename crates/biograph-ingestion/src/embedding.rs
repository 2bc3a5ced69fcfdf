//! Embedding client: turns paper text into vectors for the vector store.
//!
//! Speaks the OpenAI-compatible `/v1/embeddings` contract, which covers
//! OpenAI itself and most self-hosted servers (Ollama, vLLM, TEI, ...).

use std::time::Duration;

use async_trait::async_trait;
use biograph_common::{BiographError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::http::{build_client, check_status, map_reqwest_error};

// ── Backend config ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_dim")]
    pub dim: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url()     -> String { "https://api.openai.com".to_string() }
fn default_model()        -> String { "text-embedding-3-small".to_string() }
fn default_dim()          -> usize  { 1536 }
fn default_batch_size()   -> usize  { 32 }
fn default_timeout_secs() -> u64    { 60 }

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key: None,
            dim: default_dim(),
            batch_size: default_batch_size(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

// ── Capability ────────────────────────────────────────────────────────────────

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Dimension of every vector this embedder returns.
    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut out = self.embed_batch(&[text.to_string()]).await?;
        out.pop()
            .ok_or_else(|| BiographError::permanent("embedding backend returned no vector"))
    }

    /// One vector per input, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

// ── HTTP embedder ─────────────────────────────────────────────────────────────

pub struct HttpEmbedder {
    cfg: EmbeddingConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    pub fn new(cfg: EmbeddingConfig) -> Result<Self> {
        let client = build_client(Duration::from_secs(cfg.timeout_secs))?;
        Ok(Self { cfg, client })
    }

    fn url(&self) -> String {
        format!("{}/v1/embeddings", self.cfg.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn dimension(&self) -> usize {
        self.cfg.dim
    }

    #[instrument(skip(self, texts), fields(n = texts.len(), model = %self.cfg.model))]
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let body = serde_json::json!({
            "model": &self.cfg.model,
            "input": texts,
        });
        let mut req = self.client.post(self.url()).json(&body);
        if let Some(key) = self.cfg.api_key.as_deref().filter(|k| !k.is_empty()) {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await.map_err(map_reqwest_error)?;
        let parsed: EmbeddingResponse = check_status(resp)
            .await?
            .json()
            .await
            .map_err(map_reqwest_error)?;

        let vectors = order_embeddings(parsed, texts.len())?;
        check_vectors(&vectors, self.cfg.dim)?;
        debug!(n = vectors.len(), "embedded batch");
        Ok(vectors)
    }
}

fn order_embeddings(resp: EmbeddingResponse, expected: usize) -> Result<Vec<Vec<f32>>> {
    if resp.data.len() != expected {
        return Err(BiographError::permanent(format!(
            "embedding backend returned {} vectors for {} inputs",
            resp.data.len(),
            expected
        )));
    }
    let mut items = resp.data;
    if items.iter().all(|i| i.index.is_some()) {
        items.sort_by_key(|i| i.index);
    }
    Ok(items.into_iter().map(|i| i.embedding).collect())
}

/// Every vector must have the configured dimension and a non-zero norm.
fn check_vectors(vectors: &[Vec<f32>], dim: usize) -> Result<()> {
    if let Some(bad) = vectors.iter().find(|v| v.len() != dim) {
        return Err(BiographError::permanent(format!(
            "embedding dimension mismatch: expected {dim}, got {}",
            bad.len()
        )));
    }
    if let Some(pos) = vectors.iter().position(|v| l2_norm(v) == 0.0) {
        return Err(BiographError::permanent(format!("embedding backend returned an all-zero vector at {pos}")));
    }
    Ok(())
}

/// Euclidean norm, used to spot all-zero vectors from a misbehaving backend.
fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2_norm_unit_vector() {
        let v = vec![1.0f32, 0.0, 0.0];
        assert!((l2_norm(&v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_l2_norm_zero_is_safe() {
        assert_eq!(l2_norm(&[0.0f32; 4]), 0.0);
    }

    #[test]
    fn test_default_config_is_openai_compatible() {
        let cfg = EmbeddingConfig::default();
        assert_eq!(cfg.model, "text-embedding-3-small");
        assert_eq!(cfg.dim, 1536);
        let embedder = HttpEmbedder::new(cfg).unwrap();
        assert_eq!(embedder.url(), "https://api.openai.com/v1/embeddings");
    }

    #[test]
    fn test_response_reordered_by_index() {
        let resp: EmbeddingResponse = serde_json::from_str(
            r#"{"data":[{"index":1,"embedding":[2.0]},{"index":0,"embedding":[1.0]}]}"#,
        )
        .unwrap();
        assert_eq!(order_embeddings(resp, 2).unwrap(), vec![vec![1.0], vec![2.0]]);
    }

    #[test]
    fn test_check_vectors_rejects_wrong_dimension_and_zero_vectors() {
        assert!(check_vectors(&[vec![0.6, 0.8], vec![1.0, 0.0]], 2).is_ok());
        assert!(matches!(check_vectors(&[vec![1.0, 0.0, 0.0]], 2), Err(BiographError::Permanent(_))));
        let err = check_vectors(&[vec![1.0, 0.0], vec![0.0, 0.0]], 2).unwrap_err();
        assert!(err.to_string().contains("all-zero vector at 1"));
    }

    #[test]
    fn test_response_count_mismatch_is_permanent() {
        let resp: EmbeddingResponse = serde_json::from_str(r#"{"data":[{"embedding":[1.0]}]}"#).unwrap();
        assert!(matches!(order_embeddings(resp, 2), Err(BiographError::Permanent(_))));
    }
}
