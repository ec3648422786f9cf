//! Core data types that flow through ingestion, reindexing and search.

use serde::Serialize;

/// A document as stored: one row per unique `path`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    /// Row identifier, assigned by the store.
    pub id: i64,
    /// Local path or URL. Unique within a store.
    pub path: String,
    pub content: String,
    pub title: String,
    #[serde(skip)]
    pub embedding: Vec<f32>,
    pub is_remote: bool,
}

/// A freshly fetched document that has not been stored yet.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedDocument {
    pub path: String,
    pub content: String,
    pub title: String,
    pub is_remote: bool,
}

/// The `{embedding_model, embedding_size}` pair persisted with a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredConfig {
    pub embedding_model: String,
    pub embedding_size: usize,
}

/// One nearest-neighbour hit.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub document: Document,
    pub distance: f64,
}

/// Totals reported by `refer stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub documents: i64,
    pub total_content_bytes: i64,
}
