//! Store statistics.
//!
//! `refer stats` prints the document count, the total size of stored content,
//! and the embedding model the store was built with.

use anyhow::Result;

use crate::config::Config;
use crate::models::{StoreStats, StoredConfig};
use crate::store::Store;

/// Run the stats command: query the store and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let (store, _) = Store::open(&config.db.path).await?;
    let stats = store.stats().await;
    let stored = store.get_config().await;
    store.close().await;

    let file_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    print!(
        "{}",
        format_stats(&config.db.path.display().to_string(), file_size, &stats?, stored?.as_ref())
    );
    Ok(())
}

pub fn format_stats(
    db_path: &str,
    file_size: u64,
    stats: &StoreStats,
    stored: Option<&StoredConfig>,
) -> String {
    let mut out = String::new();
    out.push_str(&format!("Database:    {}\n", db_path));
    out.push_str(&format!("Size:        {}\n", format_bytes(file_size)));
    out.push_str(&format!("Documents:   {}\n", stats.documents));
    out.push_str(&format!(
        "Content:     {} ({} bytes)\n",
        format_bytes(stats.total_content_bytes.max(0) as u64),
        stats.total_content_bytes
    ));
    match stored {
        Some(cfg) => out.push_str(&format!(
            "Model:       {} ({} dimensions)\n",
            cfg.embedding_model, cfg.embedding_size
        )),
        None => out.push_str("Model:       (not initialized)\n"),
    }
    out
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_are_humanized() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn summary_lines() {
        let stats = StoreStats {
            documents: 2,
            total_content_bytes: 2048,
        };
        let cfg = StoredConfig {
            embedding_model: "nomic-embed-text".to_string(),
            embedding_size: 768,
        };
        let out = format_stats("/tmp/refer.sqlite", 4096, &stats, Some(&cfg));
        assert!(out.contains("Documents:   2\n"));
        assert!(out.contains("Content:     2.0 KB (2048 bytes)\n"));
        assert!(out.contains("Model:       nomic-embed-text (768 dimensions)\n"));

        let empty = format_stats("x", 0, &StoreStats::default(), None);
        assert!(empty.contains("(not initialized)"));
    }
}
