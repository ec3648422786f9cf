//! SQLite-backed document store.
//!
//! One handle is shared by every ingestion worker and the main task. Every
//! operation is a single statement or a short transaction, so no lock is held
//! across an embedding call.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteJournalMode, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};

use crate::db;
use crate::embedding::{blob_to_vec, vec_to_blob, Metric};
use crate::error::ReferError;
use crate::migrate;
use crate::models::{Document, FetchedDocument, SearchResult, StoreStats, StoredConfig};

const KEY_MODEL: &str = "embedding_model";
const KEY_SIZE: &str = "embedding_size";

#[derive(Debug)]
pub struct Store {
    pool: SqlitePool,
    path: PathBuf,
}

impl Store {
    /// Open or create the store at `path`, reporting whether it is new.
    pub async fn open(path: &Path) -> Result<(Self, bool)> {
        let (pool, is_new) = db::connect(path).await?;
        Ok((
            Self {
                pool,
                path: path.to_path_buf(),
            },
            is_new,
        ))
    }

    /// Open a single-file store (rollback journal) for building a replacement.
    pub(crate) async fn open_scratch(path: &Path) -> Result<Self> {
        let (pool, _) = db::connect_with_journal(path, SqliteJournalMode::Delete).await?;
        Ok(Self {
            pool,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn init_schema(&self, embedding_size: usize) -> Result<()> {
        migrate::init_schema(&self.pool, embedding_size).await
    }

    /// True once the document table exists.
    pub async fn is_initialized(&self) -> Result<bool> {
        migrate::table_exists(&self.pool, "documents").await
    }

    /// Replace the document stored under `doc.path` (if any) with this one.
    ///
    /// Returns the new row id.
    pub async fn upsert(&self, doc: &FetchedDocument, vector: &[f32]) -> Result<i64> {
        let blob = vec_to_blob(vector);
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM documents WHERE path = ?")
            .bind(&doc.path)
            .execute(&mut *tx)
            .await
            .context("delete existing document")?;

        let id = sqlx::query(
            "INSERT INTO documents (path, content, title, is_remote, embedding) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&doc.path)
        .bind(&doc.content)
        .bind(&doc.title)
        .bind(doc.is_remote)
        .bind(&blob)
        .execute(&mut *tx)
        .await
        .context("insert document")?
        .last_insert_rowid();

        tx.commit().await?;
        Ok(id)
    }

    /// Insert a document keeping a known id. Used when rebuilding a store.
    pub(crate) async fn insert_with_id(
        &self,
        id: i64,
        doc: &FetchedDocument,
        vector: &[f32],
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO documents (id, path, content, title, is_remote, embedding) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(&doc.path)
        .bind(&doc.content)
        .bind(&doc.title)
        .bind(doc.is_remote)
        .bind(vec_to_blob(vector))
        .execute(&self.pool)
        .await
        .with_context(|| format!("insert document {}", doc.path))?;
        Ok(())
    }

    pub async fn remove(&self, id: i64) -> Result<()> {
        if !self.is_initialized().await? {
            return Err(ReferError::DocumentNotFound(id).into());
        }

        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("remove document")?;

        if result.rows_affected() == 0 {
            return Err(ReferError::DocumentNotFound(id).into());
        }
        Ok(())
    }

    /// All documents, ordered by id.
    pub async fn get_all(&self) -> Result<Vec<Document>> {
        if !self.is_initialized().await? {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            "SELECT id, path, content, title, is_remote, embedding FROM documents ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .context("query documents")?;

        rows.iter().map(row_to_document).collect()
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<Document>> {
        if !self.is_initialized().await? {
            return Ok(None);
        }

        let row = sqlx::query(
            "SELECT id, path, content, title, is_remote, embedding FROM documents WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("query document")?;

        row.as_ref().map(row_to_document).transpose()
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        if !self.is_initialized().await? {
            return Ok(StoreStats::default());
        }

        let row = sqlx::query(
            "SELECT COUNT(*) AS documents, COALESCE(SUM(LENGTH(CAST(content AS BLOB))), 0) AS bytes FROM documents",
        )
        .fetch_one(&self.pool)
        .await
        .context("compute stats")?;

        Ok(StoreStats {
            documents: row.try_get("documents")?,
            total_content_bytes: row.try_get("bytes")?,
        })
    }

    /// Persist the model/dimension pair in one transaction.
    pub async fn save_config(&self, config: &StoredConfig) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (key, value) in [
            (KEY_MODEL, config.embedding_model.clone()),
            (KEY_SIZE, config.embedding_size.to_string()),
        ] {
            sqlx::query(
                r#"
                INSERT INTO config (key, value) VALUES (?, ?)
                ON CONFLICT(key) DO UPDATE SET value = excluded.value
                "#,
            )
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("save config {}", key))?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// The persisted model/dimension pair, or `None` if never saved.
    pub async fn get_config(&self) -> Result<Option<StoredConfig>> {
        if !migrate::table_exists(&self.pool, "config").await? {
            return Ok(None);
        }

        let rows = sqlx::query("SELECT key, value FROM config")
            .fetch_all(&self.pool)
            .await
            .context("query config")?;

        let mut model = None;
        let mut size = None;
        for row in &rows {
            let key: String = row.try_get("key")?;
            let value: String = row.try_get("value")?;
            match key.as_str() {
                KEY_MODEL => model = Some(value),
                KEY_SIZE => {
                    size = Some(value.parse::<usize>().with_context(|| {
                        format!("stored embedding_size is not a number: {}", value)
                    })?)
                }
                _ => {}
            }
        }

        Ok(match (model, size) {
            (Some(embedding_model), Some(embedding_size)) => Some(StoredConfig {
                embedding_model,
                embedding_size,
            }),
            _ => None,
        })
    }

    /// The `k` documents closest to `vector`, ascending by distance (ties by id).
    pub async fn nearest(
        &self,
        vector: &[f32],
        k: usize,
        metric: Metric,
    ) -> Result<Vec<SearchResult>> {
        if k == 0 || !self.is_initialized().await? {
            return Ok(Vec::new());
        }

        // Brute-force scan; the store is local and sized for a personal corpus.
        let rows = sqlx::query(
            "SELECT id, path, content, title, is_remote, embedding FROM documents",
        )
        .fetch_all(&self.pool)
        .await
        .context("search query failed")?;

        let mut results = rows
            .iter()
            .map(|row| {
                let document = row_to_document(row)?;
                let distance = metric.distance(vector, &document.embedding);
                Ok(SearchResult { document, distance })
            })
            .collect::<Result<Vec<_>>>()?;

        results.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.document.id.cmp(&b.document.id))
        });
        results.truncate(k);

        Ok(results)
    }

    /// Flush the WAL into the main file. Used before the file is replaced.
    pub(crate) async fn checkpoint(&self) -> Result<()> {
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

fn row_to_document(row: &SqliteRow) -> Result<Document> {
    let blob: Vec<u8> = row.try_get("embedding")?;
    let path: String = row.try_get("path")?;
    let title: String = row
        .try_get("title")
        .with_context(|| format!("decode title of {}", path))?;
    Ok(Document {
        id: row.try_get("id")?,
        content: row.try_get("content")?,
        title,
        embedding: blob_to_vec(&blob),
        is_remote: row.try_get("is_remote")?,
        path,
    })
}
