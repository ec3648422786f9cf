//! Error taxonomy.
//!
//! Three tiers, matching how callers react to them:
//!
//! - **Skip conditions** (directory, binary file) are not errors at all; the
//!   fetcher reports them as [`Fetched::Skipped`](crate::fetch::Fetched).
//! - **Item-level errors** ([`FetchError`], [`EmbeddingError`], store failures
//!   for a single document) are collected by the worker pool and reported
//!   after the batch drains.
//! - **Fatal errors** ([`ReferError`]) abort the whole command and leave the
//!   store as it was.

use std::path::PathBuf;

/// Failure to retrieve a single document.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("stat {path}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("fetch {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status}: {url}")]
    Status { url: String, status: u16 },

    #[error("captions for {url}: {message}")]
    Captions { url: String, message: String },
}

/// Failure to turn text into a vector.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("embedding request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("embedding API error {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),

    #[error("unexpected embedding dimension: got {actual}, want {expected}")]
    Dimension { expected: usize, actual: usize },

    #[error("embedding cancelled")]
    Cancelled,
}

/// Errors that abort a whole command.
#[derive(Debug, thiserror::Error)]
pub enum ReferError {
    #[error(
        "store was built with embedding model '{stored}' but '{configured}' is configured; \
         run `refer reindex` to rebuild it"
    )]
    ModelMismatch { stored: String, configured: String },

    #[error(
        "store holds {stored}-dimensional vectors but model '{model}' now produces {actual}; \
         run `refer reindex` to rebuild it"
    )]
    DimensionMismatch {
        model: String,
        stored: usize,
        actual: usize,
    },

    #[error("no document found with ID {0}")]
    DocumentNotFound(i64),

    #[error("store {0} is busy: another add, remove or reindex is running (remove the lock file if it is stale)")]
    StoreBusy(PathBuf),

    #[error("operation cancelled")]
    Cancelled,
}
