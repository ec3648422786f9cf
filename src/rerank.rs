//! Reranking collaborator.
//!
//! A reranker scores candidate texts against a query and returns the
//! candidates' indices, most relevant first.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::RerankConfig;

#[async_trait]
pub trait Reranker: Send + Sync {
    /// Indices into `documents`, most relevant first, at most `top_n` long.
    async fn rerank(&self, query: &str, documents: &[String], top_n: usize) -> Result<Vec<usize>>;
}

/// Client for a `/v1/rerank` style endpoint (llama.cpp server, TEI, Jina, Cohere).
pub struct HttpReranker {
    client: reqwest::Client,
    url: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    #[serde(default)]
    results: Vec<RerankResult>,
}

#[derive(Debug, Deserialize)]
struct RerankResult {
    index: usize,
    relevance_score: f64,
}

impl HttpReranker {
    pub fn new(config: &RerankConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl Reranker for HttpReranker {
    async fn rerank(&self, query: &str, documents: &[String], top_n: usize) -> Result<Vec<usize>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let body = serde_json::json!({
            "model": self.model,
            "query": query,
            "top_n": top_n,
            "documents": documents,
        });

        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("rerank request to {}", self.url))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("rerank API error {}: {}", status, text);
        }

        let parsed: RerankResponse = resp.json().await.context("invalid rerank response")?;
        order_results(parsed.results, documents.len(), top_n)
    }
}

/// Sort by descending relevance, truncate to `top_n`, and check every index.
fn order_results(mut results: Vec<RerankResult>, n_docs: usize, top_n: usize) -> Result<Vec<usize>> {
    if let Some(bad) = results.iter().find(|r| r.index >= n_docs) {
        bail!(
            "reranker returned index {} for {} document(s)",
            bad.index,
            n_docs
        );
    }

    results.sort_by(|a, b| {
        b.relevance_score
            .partial_cmp(&a.relevance_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    results.truncate(top_n);
    Ok(results.into_iter().map(|r| r.index).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(index: usize, relevance_score: f64) -> RerankResult {
        RerankResult {
            index,
            relevance_score,
        }
    }

    #[test]
    fn orders_by_descending_relevance() {
        let got = order_results(
            vec![result(0, -4.0), result(1, -11.0), result(2, -0.75)],
            3,
            3,
        )
        .unwrap();
        assert_eq!(got, vec![2, 0, 1]);
    }

    #[test]
    fn truncates_to_top_n() {
        let got = order_results(vec![result(0, 0.1), result(1, 0.9)], 2, 1).unwrap();
        assert_eq!(got, vec![1]);
    }

    #[test]
    fn rejects_out_of_range_index() {
        assert!(order_results(vec![result(5, 1.0)], 2, 2).is_err());
    }

    #[test]
    fn parses_response_shape() {
        let json = r#"{"model":"x","object":"list","usage":{"prompt_tokens":1,"total_tokens":1},
            "results":[{"index":1,"relevance_score":0.5},{"index":0,"relevance_score":0.2}]}"#;
        let parsed: RerankResponse = serde_json::from_str(json).unwrap();
        assert_eq!(order_results(parsed.results, 2, 5).unwrap(), vec![1, 0]);
    }
}
