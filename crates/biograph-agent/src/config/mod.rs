//! Configuration loading for biograph.
//! Reads biograph.toml from the current directory or the path in the BIOGRAPH_CONFIG env var.

use std::path::{Path, PathBuf};

use anyhow::Context;
use biograph_ingestion::{EmbeddingConfig, NcbiConfig};
use biograph_orchestration::{ConfigCheck, OrchestratorConfig, RateLimits};
use serde::{Deserialize, Serialize};

pub const CONFIG_ENV: &str = "BIOGRAPH_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "biograph.toml";
pub const PUBMED_KEY_ENV: &str = "BIOGRAPH_PUBMED_API_KEY";
pub const EMBEDDING_KEY_ENV: &str = "BIOGRAPH_EMBEDDING_API_KEY";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pubmed: NcbiConfig,
    #[serde(default)]
    pub genes: NcbiConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub rate_limits: RateLimits,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Snapshot, graph, vector and run files live under this directory.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf { PathBuf::from("./data") }

impl Default for StorageConfig {
    fn default() -> Self {
        Self { data_dir: default_data_dir() }
    }
}

impl StorageConfig {
    pub fn runs_dir(&self) -> PathBuf {
        self.data_dir.join("runs")
    }
}

/// Where the config was read from, for the startup log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    File(PathBuf),
    Defaults(PathBuf),
}

mod tests;

impl Config {
    /// Load configuration from biograph.toml.
    /// Checks BIOGRAPH_CONFIG first, then the current directory. A missing
    /// file yields the defaults; a malformed one is an error.
    pub fn load() -> anyhow::Result<(Self, Source)> {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let path = PathBuf::from(path);
        let (mut config, source) = if path.exists() {
            (Self::from_file(&path)?, Source::File(path))
        } else {
            (Self::default(), Source::Defaults(path))
        };
        config.apply_env(|name| std::env::var(name).ok());
        Ok((config, source))
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Fill API keys left empty in the file from the environment. The NCBI
    /// key covers both E-utilities sections.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        let ncbi_key = var(PUBMED_KEY_ENV).filter(|k| !k.is_empty());
        for section in [&mut self.pubmed, &mut self.genes] {
            if is_blank(&section.api_key) {
                section.api_key = ncbi_key.clone();
            }
        }
        if is_blank(&self.embedding.api_key) {
            self.embedding.api_key = var(EMBEDDING_KEY_ENV).filter(|k| !k.is_empty());
        }
    }

    /// Preconditions checked by the `validate-configuration` task.
    pub fn checks(&self) -> Vec<ConfigCheck> {
        let mut checks = Vec::with_capacity(3);

        if self.pubmed.email.trim().is_empty() {
            checks.push(ConfigCheck::fail("contact-email", "pubmed.email is empty"));
        } else {
            checks.push(ConfigCheck::pass("contact-email", self.pubmed.email.clone()));
        }

        if self.embedding.base_url.trim().is_empty() {
            checks.push(ConfigCheck::fail("embedding-endpoint", "embedding.base_url is empty"));
        } else {
            checks.push(ConfigCheck::pass("embedding-endpoint", self.embedding.base_url.clone()));
        }

        let dir = &self.storage.data_dir;
        match probe_writable(dir) {
            Ok(()) => checks.push(ConfigCheck::pass("data-dir-writable", dir.display().to_string())),
            Err(e) => checks.push(ConfigCheck::fail("data-dir-writable", format!("{}: {e}", dir.display()))),
        }

        checks
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

fn probe_writable(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let probe = dir.join(".biograph-write-probe");
    std::fs::write(&probe, b"ok")?;
    std::fs::remove_file(&probe)
}
