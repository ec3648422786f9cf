//! Embedding worker pool.
//!
//! A batch of paths is fanned out over at most `max_workers` concurrent
//! tasks. Each task runs fetch → embed → upsert on its own; a failure is
//! recorded against its path and never stops its siblings. The pool always
//! drains before returning, and completion order is unspecified.

use anyhow::Result;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::sync::watch;

use crate::config::{Config, IngestConfig};
use crate::embedding::{create_embedder, Embedder};
use crate::error::{EmbeddingError, ReferError};
use crate::fetch::{DocumentFetcher, Fetched, Fetcher, SkipReason};
use crate::lock::StoreLock;
use crate::migrate;
use crate::paths::{expand_inputs, ExpandOptions};
use crate::progress::{IngestProgressEvent, IngestProgressReporter, NoProgress, ProgressMode};
use crate::store::Store;

static NO_PROGRESS: NoProgress = NoProgress;

/// Cooperative cancellation shared by every task of an invocation.
///
/// Cloning is cheap; all clones observe the same flag.
#[derive(Clone, Debug)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// A failed item: which path, and why.
#[derive(Debug)]
pub struct IngestError {
    pub path: String,
    pub error: anyhow::Error,
}

impl std::fmt::Display for IngestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {:#}", self.path, self.error)
    }
}

impl std::error::Error for IngestError {}

impl IngestError {
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self.error.downcast_ref::<ReferError>(),
            Some(ReferError::Cancelled)
        ) || matches!(
            self.error.downcast_ref::<EmbeddingError>(),
            Some(EmbeddingError::Cancelled)
        )
    }
}

/// Totals for one batch.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub added: usize,
    pub skipped: usize,
    pub errors: Vec<IngestError>,
}

enum Outcome {
    Added(i64),
    Skipped(SkipReason),
}

/// Everything a worker needs, fixed for the whole batch.
pub struct Ingestor<'a> {
    store: &'a Store,
    embedder: &'a dyn Embedder,
    fetcher: &'a dyn DocumentFetcher,
    embedding_size: usize,
    cancel: CancelToken,
    progress: &'a dyn IngestProgressReporter,
}

impl<'a> Ingestor<'a> {
    pub fn new(
        store: &'a Store,
        embedder: &'a dyn Embedder,
        fetcher: &'a dyn DocumentFetcher,
        embedding_size: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            fetcher,
            embedding_size,
            cancel: CancelToken::new(),
            progress: &NO_PROGRESS,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: &'a dyn IngestProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    /// Ingest `paths` and return the item-level errors (empty means success).
    pub async fn add_documents(&self, paths: &[String], max_workers: usize) -> Vec<IngestError> {
        self.run_batch(paths, max_workers).await.errors
    }

    /// Like [`add_documents`](Self::add_documents), with added/skipped counts.
    pub async fn run_batch(&self, paths: &[String], max_workers: usize) -> IngestReport {
        let workers = if max_workers == 0 {
            IngestConfig::default().max_workers
        } else {
            max_workers
        };
        let total = paths.len() as u64;

        let mut results = stream::iter(paths)
            .map(|path| async move { (path, self.process(path).await) })
            .buffer_unordered(workers);

        let mut report = IngestReport::default();
        let mut n = 0u64;
        while let Some((path, result)) = results.next().await {
            n += 1;
            let path = path.clone();
            match result {
                Ok(Outcome::Added(id)) => {
                    tracing::debug!(path = %path, id, "added");
                    report.added += 1;
                    self.progress
                        .report(IngestProgressEvent::Added { path, n, total });
                }
                Ok(Outcome::Skipped(reason)) => {
                    tracing::debug!(path = %path, %reason, "skipped");
                    report.skipped += 1;
                    self.progress.report(IngestProgressEvent::Skipped {
                        path,
                        reason: reason.to_string(),
                        n,
                        total,
                    });
                }
                Err(error) => {
                    tracing::warn!(path = %path, error = %format!("{:#}", error), "failed");
                    self.progress.report(IngestProgressEvent::Failed {
                        path: path.clone(),
                        error: format!("{:#}", error),
                        n,
                        total,
                    });
                    report.errors.push(IngestError { path, error });
                }
            }
        }

        report
    }

    async fn process(&self, path: &str) -> Result<Outcome> {
        if self.cancel.is_cancelled() {
            return Err(ReferError::Cancelled.into());
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ReferError::Cancelled.into()),
            outcome = self.ingest_one(path) => outcome,
        }
    }

    async fn ingest_one(&self, path: &str) -> Result<Outcome> {
        let doc = match self.fetcher.fetch(path).await? {
            Fetched::Document(doc) => doc,
            Fetched::Skipped(reason) => return Ok(Outcome::Skipped(reason)),
        };

        let vector = self.embedder.embed(&doc.content).await?;
        if vector.len() != self.embedding_size {
            return Err(EmbeddingError::Dimension {
                expected: self.embedding_size,
                actual: vector.len(),
            }
            .into());
        }

        let id = self.store.upsert(&doc, &vector).await?;
        Ok(Outcome::Added(id))
    }
}

/// `refer add`: expand inputs, prepare the store, and ingest everything.
pub async fn run_add(
    config: &Config,
    inputs: &[String],
    progress: ProgressMode,
    cancel: CancelToken,
) -> Result<()> {
    let _lock = StoreLock::acquire(&config.db.path)?;

    let paths = expand_inputs(inputs, &ExpandOptions::from(&config.ingest))?;
    if paths.is_empty() {
        println!("No documents to add.");
        return Ok(());
    }

    let embedder = create_embedder(&config.embedding)?;
    let (store, _) = Store::open(&config.db.path).await?;
    let stored = migrate::prepare_for_ingest(&store, embedder.as_ref()).await?;
    let fetcher = Fetcher::new(config.embedding.timeout_secs)?;
    let reporter = progress.reporter();

    let report = Ingestor::new(&store, embedder.as_ref(), &fetcher, stored.embedding_size)
        .with_cancel(cancel.clone())
        .with_progress(reporter.as_ref())
        .run_batch(&paths, config.ingest.max_workers)
        .await;
    store.close().await;

    for error in &report.errors {
        eprintln!("{}", error);
    }
    println!(
        "Added {} document(s), skipped {}, failed {}.",
        report.added,
        report.skipped,
        report.errors.len()
    );

    if cancel.is_cancelled() {
        return Err(ReferError::Cancelled.into());
    }
    if !report.errors.is_empty() {
        anyhow::bail!(
            "{} of {} document(s) failed",
            report.errors.len(),
            paths.len()
        );
    }
    Ok(())
}
