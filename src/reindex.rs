//! Rebuild the store against the currently configured embedding model.
//!
//! The rebuild goes into a scratch file next to the store and is renamed over
//! it only once complete, so a failed or cancelled reindex leaves the old
//! store untouched.
//!
//! When model and dimension are unchanged, a document whose re-fetched content
//! is identical to the stored content keeps its stored vector and costs no
//! embedding call. Otherwise every surviving document is re-embedded.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::embedding::{create_embedder, probe_dimension, Embedder};
use crate::error::{EmbeddingError, ReferError};
use crate::fetch::{DocumentFetcher, Fetched, Fetcher};
use crate::ingest::CancelToken;
use crate::lock::StoreLock;
use crate::models::{Document, StoredConfig};
use crate::store::Store;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReindexReport {
    /// Documents in the store before the rebuild.
    pub original: usize,
    /// Documents that were embedded again.
    pub changed: usize,
    /// Documents that could not be re-fetched (or are now skipped) and were left out.
    pub dropped: usize,
    /// Whether every document was re-embedded because the model changed.
    pub full_rebuild: bool,
}

/// Rebuild `store` and return the replacement handle.
///
/// Consumes the handle because the underlying file is replaced.
pub async fn reindex(
    store: Store,
    embedder: &dyn Embedder,
    fetcher: &dyn DocumentFetcher,
    cancel: &CancelToken,
) -> Result<(Store, ReindexReport)> {
    let stored = store.get_config().await?;
    let documents = store.get_all().await?;
    if stored.is_none() && documents.is_empty() {
        return Ok((store, ReindexReport::default()));
    }

    let embedding_size = probe_dimension(embedder)
        .await
        .context("detect embedding dimension")?;
    let target = StoredConfig {
        embedding_model: embedder.model_name().to_string(),
        embedding_size,
    };
    let full_rebuild = stored.as_ref() != Some(&target);
    tracing::info!(
        documents = documents.len(),
        full_rebuild,
        model = %target.embedding_model,
        embedding_size,
        "reindexing"
    );

    let scratch_path = scratch_path(store.path());
    remove_if_exists(&scratch_path)?;
    let scratch = Store::open_scratch(&scratch_path).await?;

    let mut report = ReindexReport {
        original: documents.len(),
        full_rebuild,
        ..Default::default()
    };

    let built = copy_documents(
        &scratch,
        &documents,
        embedder,
        fetcher,
        cancel,
        &target,
        &mut report,
    )
    .await;

    scratch.close().await;
    if let Err(e) = built {
        if let Err(cleanup) = remove_if_exists(&scratch_path) {
            tracing::warn!(path = %scratch_path.display(), error = %cleanup, "failed to remove scratch store");
        }
        return Err(e.context("reindex failed; the existing store was left unchanged"));
    }

    let store_path = store.path().to_path_buf();
    swap_into_place(store, &scratch_path).await?;
    let (store, _) = Store::open(&store_path).await?;
    Ok((store, report))
}

/// Fill the scratch store from `documents`, re-fetching each one.
///
/// Fetch failures and skips drop the document. Embedding failures and
/// cancellation are fatal.
async fn copy_documents(
    scratch: &Store,
    documents: &[Document],
    embedder: &dyn Embedder,
    fetcher: &dyn DocumentFetcher,
    cancel: &CancelToken,
    target: &StoredConfig,
    report: &mut ReindexReport,
) -> Result<()> {
    scratch.init_schema(target.embedding_size).await?;
    scratch.save_config(target).await?;

    for doc in documents {
        if cancel.is_cancelled() {
            return Err(ReferError::Cancelled.into());
        }

        let fresh = match fetcher.fetch(&doc.path).await {
            Ok(Fetched::Document(fresh)) => fresh,
            Ok(Fetched::Skipped(reason)) => {
                tracing::warn!(path = %doc.path, %reason, "dropping document");
                report.dropped += 1;
                continue;
            }
            Err(e) => {
                tracing::warn!(path = %doc.path, error = %e, "dropping document: fetch failed");
                report.dropped += 1;
                continue;
            }
        };

        let vector = if !report.full_rebuild && fresh.content == doc.content {
            doc.embedding.clone()
        } else {
            let embedded = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ReferError::Cancelled.into()),
                v = embedder.embed(&fresh.content) => v,
            };
            let vector = embedded.with_context(|| format!("embed {}", doc.path))?;
            if vector.len() != target.embedding_size {
                return Err(EmbeddingError::Dimension {
                    expected: target.embedding_size,
                    actual: vector.len(),
                })
                .with_context(|| format!("embed {}", doc.path));
            }
            report.changed += 1;
            vector
        };

        scratch.insert_with_id(doc.id, &fresh, &vector).await?;
    }
    Ok(())
}

/// Replace the store file with the scratch file.
async fn swap_into_place(store: Store, scratch_path: &Path) -> Result<()> {
    let store_path = store.path().to_path_buf();
    store.checkpoint().await?;
    store.close().await;

    for suffix in ["-wal", "-shm"] {
        remove_if_exists(&sidecar(&store_path, suffix))?;
    }
    std::fs::rename(scratch_path, &store_path).with_context(|| {
        format!(
            "replace {} with {}",
            store_path.display(),
            scratch_path.display()
        )
    })?;
    Ok(())
}

fn scratch_path(store_path: &Path) -> PathBuf {
    sidecar(store_path, ".reindex")
}

fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("remove {}", path.display())),
    }
}

/// `refer reindex`.
pub async fn run_reindex(config: &Config, cancel: CancelToken) -> Result<()> {
    let _lock = StoreLock::acquire(&config.db.path)?;

    let embedder = create_embedder(&config.embedding)?;
    let fetcher = Fetcher::new(config.embedding.timeout_secs)?;
    let (store, _) = Store::open(&config.db.path).await?;

    let (store, report) = reindex(store, embedder.as_ref(), &fetcher, &cancel).await?;
    store.close().await;

    if report.original == 0 {
        println!("No documents to reindex.");
        return Ok(());
    }
    if report.full_rebuild {
        println!("Embedding model changed; all documents were re-embedded.");
    }
    println!(
        "Reindexed {} document(s): {} re-embedded, {} dropped.",
        report.original, report.changed, report.dropped
    );
    Ok(())
}
