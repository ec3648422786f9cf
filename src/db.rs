use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;

/// Open (creating if needed) the SQLite file at `path`.
///
/// Returns the pool and whether the file was freshly created.
pub async fn connect(path: &Path) -> Result<(SqlitePool, bool)> {
    connect_with_journal(path, SqliteJournalMode::Wal).await
}

/// Like [`connect`], with an explicit journal mode. Reindex builds its
/// temporary store with `Delete` so the result is a single renameable file.
pub async fn connect_with_journal(
    path: &Path,
    journal_mode: SqliteJournalMode,
) -> Result<(SqlitePool, bool)> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
    }

    let is_new = !path.exists();

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(journal_mode);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("open database {}", path.display()))?;

    Ok((pool, is_new))
}
