//! Document listing, lookup by id, and removal.

use anyhow::Result;

use crate::config::Config;
use crate::error::ReferError;
use crate::lock::StoreLock;
use crate::models::Document;
use crate::store::Store;

/// `refer show [ID]`: list every document, or print one in full.
pub async fn run_show(config: &Config, id: Option<i64>) -> Result<()> {
    let (store, _) = Store::open(&config.db.path).await?;

    let output = match id {
        None => store.get_all().await.map(|docs| format_listing(&docs)),
        Some(id) => match store.get_by_id(id).await {
            Ok(Some(doc)) => Ok(format_document(&doc)),
            Ok(None) => Err(ReferError::DocumentNotFound(id).into()),
            Err(e) => Err(e),
        },
    };
    store.close().await;

    print!("{}", output?);
    Ok(())
}

/// `refer remove ID`.
pub async fn run_remove(config: &Config, id: i64) -> Result<()> {
    let _lock = StoreLock::acquire(&config.db.path)?;
    let (store, _) = Store::open(&config.db.path).await?;
    let removed = store.remove(id).await;
    store.close().await;
    removed?;

    println!("Removed document {}.", id);
    Ok(())
}

/// One line per document: `id: path`, with the title when it adds anything.
pub fn format_listing(documents: &[Document]) -> String {
    if documents.is_empty() {
        return "No documents.\n".to_string();
    }

    let mut out = String::new();
    for doc in documents {
        if doc.title.is_empty() || doc.title == doc.path {
            out.push_str(&format!("{}: {}\n", doc.id, doc.path));
        } else {
            out.push_str(&format!("{}: {} ({})\n", doc.id, doc.path, doc.title));
        }
    }
    out
}

pub fn format_document(doc: &Document) -> String {
    let mut out = String::new();
    out.push_str("--- Document ---\n");
    out.push_str(&format!("id:     {}\n", doc.id));
    out.push_str(&format!("path:   {}\n", doc.path));
    out.push_str(&format!("title:  {}\n", doc.title));
    out.push_str(&format!("remote: {}\n", doc.is_remote));
    out.push('\n');
    out.push_str("--- Content ---\n");
    out.push_str(&doc.content);
    if !doc.content.ends_with('\n') {
        out.push('\n');
    }
    out
}
