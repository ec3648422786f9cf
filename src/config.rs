//! TOML configuration.
//!
//! Every section is optional. A missing config file yields [`Config::default`];
//! a file that exists but fails to parse or validate is an error.
//!
//! ```toml
//! [db]
//! path = "~/.local/share/refer/refer.sqlite"
//!
//! [embedding]
//! provider = "ollama"          # or "openai"
//! model = "nomic-embed-text"
//!
//! [ingest]
//! max_workers = 10
//! exclude_globs = ["**/*.lock"]
//!
//! [retrieval]
//! limit = 5
//! metric = "l2"                # or "cosine"
//!
//! [rerank]
//! url = "http://localhost:11435/v1/rerank"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::embedding::Metric;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub rerank: RerankConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("refer").join("refer.sqlite"))
        .unwrap_or_else(|| PathBuf::from(".refer.sqlite"))
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Endpoint override. Defaults depend on the provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            url: None,
            api_key: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_provider() -> String {
    "ollama".to_string()
}
fn default_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}

impl EmbeddingConfig {
    /// The endpoint embeddings are posted to.
    pub fn endpoint(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        match self.provider.as_str() {
            "openai" => "https://api.openai.com/v1/embeddings".to_string(),
            _ => "http://localhost:11434/api/embeddings".to_string(),
        }
    }

    /// API key from config, falling back to `REFER_API_KEY` then `OPENAI_API_KEY`.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("REFER_API_KEY").ok())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_true")]
    pub respect_gitignore: bool,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            respect_gitignore: true,
            exclude_globs: Vec::new(),
        }
    }
}

fn default_max_workers() -> usize {
    10
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(default)]
    pub metric: Metric,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            threshold: None,
            metric: Metric::default(),
        }
    }
}

fn default_limit() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct RerankConfig {
    #[serde(default = "default_rerank_url")]
    pub url: String,
    #[serde(default)]
    pub model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            url: default_rerank_url(),
            model: String::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_rerank_url() -> String {
    "http://localhost:11435/v1/rerank".to_string()
}

/// `<user config dir>/refer/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("refer").join("config.toml"))
}

/// Load configuration from `path`, or from the default location when `None`.
///
/// A missing file yields defaults.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path.map(Path::to_path_buf).or_else(default_config_path) {
        Some(p) => p,
        None => return Ok(Config::default()),
    };

    if !path.exists() {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
        .with_context(|| format!("Invalid config file: {}", path.display()))
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;

    match config.embedding.provider.as_str() {
        "ollama" | "openai" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be ollama or openai.",
            other
        ),
    }

    if config.embedding.model.trim().is_empty() {
        bail!("embedding.model must not be empty");
    }

    if config.ingest.max_workers == 0 {
        bail!("ingest.max_workers must be > 0");
    }

    if config.retrieval.limit < 1 {
        bail!("retrieval.limit must be >= 1");
    }

    if let Some(t) = config.retrieval.threshold {
        if !(t >= 0.0) {
            bail!("retrieval.threshold must be >= 0");
        }
    }

    Ok(config)
}
