//! Embedding backends and vector utilities.
//!
//! The rest of the crate only sees the [`Embedder`] trait; the HTTP-backed
//! [`HttpEmbedder`] talks to either an Ollama-style endpoint
//! (`{"model", "prompt"}` → `{"embedding": [...]}`) or an OpenAI-compatible one
//! (`{"model", "input"}` → `{"data": [{"embedding": [...]}]}`).
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! Vector helpers:
//! - [`vec_to_blob`] / [`blob_to_vec`]: little-endian f32 BLOB encoding
//! - [`cosine_similarity`], [`l2_distance`] and [`Metric::distance`]

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::EmbeddingError;

/// Text used to learn the dimension of the configured model.
pub const SAMPLE_TEXT: &str = "sample text for embedding dimension detection";

/// Something that turns text into a fixed-length vector.
///
/// Implementations must be cheap to share across workers.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier persisted alongside the store (e.g. `"nomic-embed-text"`).
    fn model_name(&self) -> &str;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Embed [`SAMPLE_TEXT`] and report the resulting vector length.
pub async fn probe_dimension(embedder: &dyn Embedder) -> Result<usize, EmbeddingError> {
    let v = embedder.embed(SAMPLE_TEXT).await?;
    if v.is_empty() {
        return Err(EmbeddingError::InvalidResponse(
            "model returned an empty vector".to_string(),
        ));
    }
    Ok(v.len())
}

// ============ HTTP Embedder ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavor {
    Ollama,
    OpenAI,
}

/// Embedding client for Ollama and OpenAI-compatible endpoints.
pub struct HttpEmbedder {
    client: reqwest::Client,
    flavor: Flavor,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    max_retries: u32,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let flavor = match config.provider.as_str() {
            "ollama" => Flavor::Ollama,
            "openai" => Flavor::OpenAI,
            other => anyhow::bail!("Unknown embedding provider: {}", other),
        };

        let api_key = config.resolved_api_key();
        if flavor == Flavor::OpenAI && api_key.is_none() {
            anyhow::bail!(
                "embedding.api_key (or REFER_API_KEY / OPENAI_API_KEY) is required for the openai provider"
            );
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            flavor,
            endpoint: config.endpoint(),
            model: config.model.clone(),
            api_key,
            max_retries: config.max_retries,
        })
    }

    fn request_body(&self, text: &str) -> serde_json::Value {
        match self.flavor {
            Flavor::Ollama => serde_json::json!({ "model": self.model, "prompt": text }),
            Flavor::OpenAI => serde_json::json!({ "model": self.model, "input": text }),
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let body = self.request_body(text);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let mut request = self.client.post(&self.endpoint).json(&body);
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return match self.flavor {
                            Flavor::Ollama => parse_ollama_response(&json),
                            Flavor::OpenAI => parse_openai_response(&json),
                        };
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err = EmbeddingError::Status {
                        status: status.as_u16(),
                        body: body_text,
                    };

                    // Rate limited or server error, retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        tracing::debug!(attempt, %status, "embedding request failed, retrying");
                        last_err = Some(err);
                        continue;
                    }

                    return Err(err);
                }
                Err(e) => {
                    tracing::debug!(attempt, error = %e, "embedding request failed, retrying");
                    last_err = Some(EmbeddingError::Request(e));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            EmbeddingError::InvalidResponse("embedding failed after retries".to_string())
        }))
    }
}

/// Build the embedder described by the configuration.
pub fn create_embedder(config: &EmbeddingConfig) -> anyhow::Result<Box<dyn Embedder>> {
    Ok(Box::new(HttpEmbedder::new(config)?))
}

fn json_to_vec(values: &[serde_json::Value]) -> Result<Vec<f32>, EmbeddingError> {
    values
        .iter()
        .map(|v| {
            v.as_f64().map(|f| f as f32).ok_or_else(|| {
                EmbeddingError::InvalidResponse("embedding contains a non-number".to_string())
            })
        })
        .collect()
}

/// Parse an Ollama response: `{"embedding": [...]}` (`/api/embeddings`) or
/// `{"embeddings": [[...]]}` (`/api/embed`).
fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<f32>, EmbeddingError> {
    if let Some(values) = json.get("embedding").and_then(|e| e.as_array()) {
        return json_to_vec(values);
    }

    let first = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .and_then(|e| e.first())
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            EmbeddingError::InvalidResponse("missing embedding array".to_string())
        })?;
    json_to_vec(first)
}

/// Parse an OpenAI response, taking `data[0].embedding`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<f32>, EmbeddingError> {
    let values = json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|d| d.first())
        .and_then(|item| item.get("embedding"))
        .and_then(|e| e.as_array())
        .ok_or_else(|| EmbeddingError::InvalidResponse("missing data[0].embedding".to_string()))?;
    json_to_vec(values)
}

// ============ Vectors ============

/// Distance function used for nearest-neighbour lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Euclidean distance.
    #[default]
    L2,
    /// `1 - cosine_similarity`, in `[0, 2]`.
    Cosine,
}

impl Metric {
    /// Smaller is closer.
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f64 {
        match self {
            Metric::L2 => l2_distance(a, b) as f64,
            Metric::Cosine => 1.0 - cosine_similarity(a, b) as f64,
        }
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use refer::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Euclidean distance. Vectors of different lengths are infinitely far apart.
pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}
