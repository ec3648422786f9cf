//! Multi-query search with result fusion.
//!
//! Each query is embedded and looked up independently. The per-query result
//! sets are merged so that a document appears once, at its best (smallest)
//! distance across queries. Threshold filtering and the `limit` cut are
//! applied to the fused list, and an optional reranker then reorders what is
//! left using the first query.

use anyhow::{bail, Context, Result};
use std::collections::HashMap;

use crate::config::Config;
use crate::embedding::{create_embedder, Embedder, Metric};
use crate::migrate;
use crate::models::SearchResult;
use crate::rerank::{HttpReranker, Reranker};
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub limit: usize,
    /// Maximum distance; results further away are dropped.
    pub threshold: Option<f64>,
    pub metric: Metric,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Names,
    Llm,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "names" => Ok(OutputFormat::Names),
            "llm" => Ok(OutputFormat::Llm),
            "json" => Ok(OutputFormat::Json),
            other => bail!("Unknown format: {}. Use names, llm, or json.", other),
        }
    }
}

/// Search the store with one or more queries.
///
/// Any query embedding failure aborts the whole call. An empty result is
/// `Ok(vec![])`. A store that was never initialized returns no results
/// without embedding anything.
pub async fn search_documents(
    store: &Store,
    embedder: &dyn Embedder,
    reranker: Option<&dyn Reranker>,
    queries: &[String],
    options: &SearchOptions,
) -> Result<Vec<SearchResult>> {
    let Some(first_query) = queries.first() else {
        return Ok(Vec::new());
    };
    if options.limit == 0 || !store.is_initialized().await? {
        return Ok(Vec::new());
    }
    let stored = migrate::ensure_model_matches(store, embedder).await?;

    let mut result_sets = Vec::with_capacity(queries.len());
    for query in queries {
        let vector = embedder
            .embed(query)
            .await
            .with_context(|| format!("embed query '{}'", query))?;
        if let Some(cfg) = &stored {
            migrate::ensure_dimension_matches(cfg, vector.len())?;
        }
        let hits = store
            .nearest(&vector, options.limit, options.metric)
            .await?;
        tracing::debug!(query = %query, hits = hits.len(), "query done");
        result_sets.push(hits);
    }

    let fused = fuse(result_sets, options.limit, options.threshold);

    match reranker {
        Some(reranker) if !fused.is_empty() => {
            apply_rerank(reranker, first_query, fused, options.limit).await
        }
        _ => Ok(fused),
    }
}

/// Merge per-query result sets.
///
/// Deduplicates by path keeping the smallest distance, orders ascending by
/// distance (ties keep first-seen order), drops results beyond `threshold`,
/// then keeps at most `limit`.
pub fn fuse(
    result_sets: Vec<Vec<SearchResult>>,
    limit: usize,
    threshold: Option<f64>,
) -> Vec<SearchResult> {
    let mut merged: Vec<SearchResult> = Vec::new();
    let mut seen: HashMap<String, usize> = HashMap::new();

    for result in result_sets.into_iter().flatten() {
        match seen.get(&result.document.path) {
            Some(&idx) => {
                if result.distance < merged[idx].distance {
                    merged[idx] = result;
                }
            }
            None => {
                seen.insert(result.document.path.clone(), merged.len());
                merged.push(result);
            }
        }
    }

    merged.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    if let Some(max) = threshold {
        merged.retain(|r| r.distance <= max);
    }
    merged.truncate(limit);
    merged
}

async fn apply_rerank(
    reranker: &dyn Reranker,
    query: &str,
    results: Vec<SearchResult>,
    limit: usize,
) -> Result<Vec<SearchResult>> {
    let contents: Vec<String> = results.iter().map(|r| r.document.content.clone()).collect();
    let order = reranker
        .rerank(query, &contents, limit)
        .await
        .context("rerank failed")?;

    let mut slots: Vec<Option<SearchResult>> = results.into_iter().map(Some).collect();
    let mut ranked = Vec::with_capacity(order.len());
    for idx in order {
        let Some(result) = slots.get_mut(idx).and_then(Option::take) else {
            bail!("reranker returned invalid or repeated index {}", idx);
        };
        ranked.push(result);
    }
    Ok(ranked)
}

/// `refer search`: embed the queries, fuse, and print.
pub async fn run_search(
    config: &Config,
    queries: &[String],
    format: OutputFormat,
    limit: Option<usize>,
    threshold: Option<f64>,
    rerank: bool,
) -> Result<()> {
    let queries: Vec<String> = queries
        .iter()
        .filter(|q| !q.trim().is_empty())
        .cloned()
        .collect();
    if queries.is_empty() {
        bail!("at least one non-empty query is required");
    }

    let options = SearchOptions {
        limit: limit.unwrap_or(config.retrieval.limit),
        threshold: threshold.or(config.retrieval.threshold),
        metric: config.retrieval.metric,
    };
    if let Some(t) = options.threshold {
        if t < 0.0 {
            bail!("threshold must be >= 0");
        }
    }

    let embedder = create_embedder(&config.embedding)?;
    let reranker = if rerank {
        Some(HttpReranker::new(&config.rerank)?)
    } else {
        None
    };

    let (store, _) = Store::open(&config.db.path).await?;
    let results = search_documents(
        &store,
        embedder.as_ref(),
        reranker.as_ref().map(|r| r as &dyn Reranker),
        &queries,
        &options,
    )
    .await;
    store.close().await;
    let results = results?;

    print!("{}", format_results(&results, format)?);
    Ok(())
}

/// Render results for stdout.
pub fn format_results(results: &[SearchResult], format: OutputFormat) -> Result<String> {
    if results.is_empty() && format != OutputFormat::Json {
        return Ok("No results found.\n".to_string());
    }

    let mut out = String::new();
    match format {
        OutputFormat::Names => {
            for r in results {
                out.push_str(&format!(
                    "{}: {} ({:.4})\n",
                    r.document.id, r.document.path, r.distance
                ));
            }
        }
        OutputFormat::Llm => {
            for r in results {
                out.push_str(&format!("File: {}\n", r.document.path));
                out.push_str(&format!("Title: {}\n\n", r.document.title));
                out.push_str(r.document.content.trim_end());
                out.push_str("\n---\n");
            }
        }
        OutputFormat::Json => {
            out.push_str(&serde_json::to_string_pretty(results)?);
            out.push('\n');
        }
    }
    Ok(out)
}
