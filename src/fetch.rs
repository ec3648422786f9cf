//! Document fetcher: turn a path or URL into text plus a title.
//!
//! Remote URLs are downloaded and converted from HTML to markdown (YouTube
//! watch URLs become caption transcripts). Local paths are read from disk
//! after a binary sniff. Directories and binary files are skipped, which is
//! not an error.

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncReadExt;

use crate::error::FetchError;
use crate::models::FetchedDocument;
use crate::youtube;

/// How many leading bytes are inspected to classify a file.
pub const SNIFF_LEN: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Directory,
    Binary,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Directory => write!(f, "directory"),
            SkipReason::Binary => write!(f, "binary file"),
        }
    }
}

#[derive(Debug)]
pub enum Fetched {
    Document(FetchedDocument),
    Skipped(SkipReason),
}

/// Anything that can resolve a path into a document.
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(&self, path: &str) -> Result<Fetched, FetchError>;
}

/// Fetches local files over the filesystem and URLs over HTTP.
pub struct Fetcher {
    client: reqwest::Client,
}

impl Fetcher {
    pub fn new(timeout_secs: u64) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("refer/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    async fn fetch_remote(&self, url: &str) -> Result<FetchedDocument, FetchError> {
        if youtube::is_youtube_url(url) {
            return youtube::fetch_transcript(&self.client, url).await;
        }

        let http_err = |source| FetchError::Http {
            url: url.to_string(),
            source,
        };
        let resp = self.client.get(url).send().await.map_err(http_err)?;
        if !resp.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: resp.status().as_u16(),
            });
        }
        let html = resp.text().await.map_err(http_err)?;

        Ok(FetchedDocument {
            path: url.to_string(),
            content: html_to_markdown(&html),
            title: extract_title(&html).unwrap_or_else(|| url.to_string()),
            is_remote: true,
        })
    }
}

#[async_trait]
impl DocumentFetcher for Fetcher {
    async fn fetch(&self, path: &str) -> Result<Fetched, FetchError> {
        if is_remote_url(path) {
            return self.fetch_remote(path).await.map(Fetched::Document);
        }
        fetch_local(path).await
    }
}

async fn fetch_local(path: &str) -> Result<Fetched, FetchError> {
    let fs_path = Path::new(path);
    let metadata = tokio::fs::metadata(fs_path)
        .await
        .map_err(|source| FetchError::Stat {
            path: fs_path.to_path_buf(),
            source,
        })?;
    if metadata.is_dir() {
        return Ok(Fetched::Skipped(SkipReason::Directory));
    }

    let read_err = |source| FetchError::Read {
        path: fs_path.to_path_buf(),
        source,
    };

    let mut file = tokio::fs::File::open(fs_path).await.map_err(read_err)?;
    let mut head = Vec::with_capacity(SNIFF_LEN);
    (&mut file)
        .take(SNIFF_LEN as u64)
        .read_to_end(&mut head)
        .await
        .map_err(read_err)?;
    if is_binary(&head) {
        return Ok(Fetched::Skipped(SkipReason::Binary));
    }

    let mut bytes = head;
    file.read_to_end(&mut bytes).await.map_err(read_err)?;

    Ok(Fetched::Document(FetchedDocument {
        path: path.to_string(),
        content: String::from_utf8_lossy(&bytes).into_owned(),
        title: path.to_string(),
        is_remote: false,
    }))
}

pub fn is_remote_url(path: &str) -> bool {
    path.starts_with("http://") || path.starts_with("https://")
}

/// Binary when the first [`SNIFF_LEN`] bytes hold a NUL, or a high byte
/// outside the printable Latin-1 range 192..=255. Empty input is text.
pub fn is_binary(bytes: &[u8]) -> bool {
    bytes
        .iter()
        .take(SNIFF_LEN)
        .any(|&b| b == 0 || (b > 127 && b < 192))
}

pub fn html_to_markdown(html: &str) -> String {
    html2md::parse_html(html).trim().to_string()
}

/// Text of the first `<title>` element, trimmed. `None` when missing or blank.
pub fn extract_title(html: &str) -> Option<String> {
    let document = scraper::Html::parse_document(html);
    let selector = scraper::Selector::parse("title").ok()?;
    let title = document
        .select(&selector)
        .next()?
        .text()
        .collect::<String>();
    let title = title.trim();
    if title.is_empty() {
        None
    } else {
        Some(title.to_string())
    }
}
