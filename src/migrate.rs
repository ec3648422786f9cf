//! Schema creation and embedding-model drift checks.
//!
//! The document table is parameterized by the embedding dimension: its
//! `embedding` column carries a `CHECK` on the BLOB length, so a store built
//! for one dimension cannot hold vectors of another. Changing model or
//! dimension therefore always goes through [`crate::reindex`].

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use crate::embedding::{probe_dimension, Embedder};
use crate::error::ReferError;
use crate::models::StoredConfig;
use crate::store::Store;

/// Create the document and config tables if they do not exist yet.
///
/// Idempotent. An existing document table keeps whatever dimension it was
/// created with.
pub async fn init_schema(pool: &SqlitePool, embedding_size: usize) -> Result<()> {
    anyhow::ensure!(embedding_size > 0, "embedding size must be > 0");

    // The dimension is a trusted integer, so formatting it into DDL is safe.
    let documents_ddl = format!(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            path TEXT NOT NULL UNIQUE,
            content TEXT NOT NULL,
            title TEXT NOT NULL,
            is_remote INTEGER NOT NULL DEFAULT 0,
            embedding BLOB NOT NULL CHECK (length(embedding) = {})
        )
        "#,
        embedding_size * 4
    );

    sqlx::query(&documents_ddl)
        .execute(pool)
        .await
        .context("create documents table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS config (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .context("create config table")?;

    Ok(())
}

pub async fn table_exists(pool: &SqlitePool, name: &str) -> Result<bool> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(name)
            .fetch_one(pool)
            .await?;
    Ok(count > 0)
}

/// Fail with [`ReferError::ModelMismatch`] when the store was built with a
/// different model than `embedder` uses.
///
/// Returns the stored config, or `None` for a store that was never initialized.
pub async fn ensure_model_matches(
    store: &Store,
    embedder: &dyn Embedder,
) -> Result<Option<StoredConfig>> {
    let stored = store.get_config().await?;
    if let Some(cfg) = &stored {
        if cfg.embedding_model != embedder.model_name() {
            return Err(ReferError::ModelMismatch {
                stored: cfg.embedding_model.clone(),
                configured: embedder.model_name().to_string(),
            }
            .into());
        }
    }
    Ok(stored)
}

/// Fail with [`ReferError::DimensionMismatch`] when a vector from the
/// configured model does not fit the store.
pub fn ensure_dimension_matches(stored: &StoredConfig, actual: usize) -> Result<()> {
    if actual != stored.embedding_size {
        return Err(ReferError::DimensionMismatch {
            model: stored.embedding_model.clone(),
            stored: stored.embedding_size,
            actual,
        }
        .into());
    }
    Ok(())
}

/// Make the store ready to accept documents from `embedder`.
///
/// A store without config learns its dimension from a sample embedding,
/// gets its schema, and records the model. An existing store is checked for
/// drift in both model name and dimension.
pub async fn prepare_for_ingest(store: &Store, embedder: &dyn Embedder) -> Result<StoredConfig> {
    let stored = ensure_model_matches(store, embedder).await?;
    let embedding_size = probe_dimension(embedder)
        .await
        .context("detect embedding dimension")?;

    if let Some(cfg) = stored {
        ensure_dimension_matches(&cfg, embedding_size)?;
        init_schema(store.pool(), cfg.embedding_size).await?;
        return Ok(cfg);
    }

    tracing::info!(
        model = embedder.model_name(),
        embedding_size,
        "initializing store"
    );

    init_schema(store.pool(), embedding_size).await?;
    let cfg = StoredConfig {
        embedding_model: embedder.model_name().to_string(),
        embedding_size,
    };
    store.save_config(&cfg).await?;
    Ok(cfg)
}
