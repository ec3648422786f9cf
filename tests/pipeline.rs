//! End-to-end tests of ingestion, reindexing and search against a real SQLite
//! store, using deterministic in-process embedder and reranker fakes.

use anyhow::Result;
use async_trait::async_trait;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

use refer::embedding::{Embedder, Metric};
use refer::error::{EmbeddingError, ReferError};
use refer::fetch::Fetcher;
use refer::ingest::{CancelToken, IngestError, Ingestor};
use refer::migrate;
use refer::models::StoredConfig;
use refer::reindex::reindex;
use refer::rerank::Reranker;
use refer::search::{search_documents, SearchOptions};
use refer::store::Store;

/// Hashed bag-of-words embedder. Texts sharing words land close together.
struct FakeEmbedder {
    model: String,
    dims: usize,
    calls: AtomicUsize,
    poison: Option<String>,
    delay: Option<Duration>,
}

impl FakeEmbedder {
    fn new(model: &str, dims: usize) -> Self {
        Self {
            model: model.to_string(),
            dims,
            calls: AtomicUsize::new(0),
            poison: None,
            delay: None,
        }
    }

    fn failing_on(mut self, word: &str) -> Self {
        self.poison = Some(word.to_string());
        self
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.calls.store(0, Ordering::SeqCst);
    }
}

fn fnv1a(word: &str) -> u64 {
    let mut hash = 0xcbf29ce484222325u64;
    for b in word.bytes() {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[async_trait]
impl Embedder for FakeEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(poison) = &self.poison {
            if text.contains(poison.as_str()) {
                return Err(EmbeddingError::Status {
                    status: 500,
                    body: "poisoned".to_string(),
                });
            }
        }

        let mut v = vec![0.0f32; self.dims];
        v[0] = 1.0;
        for word in text.split_whitespace() {
            let word = word.to_lowercase();
            v[(fnv1a(&word) as usize) % self.dims] += 1.0;
        }
        Ok(v)
    }
}

/// Reverses whatever order it is given.
struct ReverseReranker;

#[async_trait]
impl Reranker for ReverseReranker {
    async fn rerank(&self, _query: &str, documents: &[String], top_n: usize) -> Result<Vec<usize>> {
        Ok((0..documents.len()).rev().take(top_n).collect())
    }
}

fn write(dir: &Path, name: &str, content: &str) -> String {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path.to_string_lossy().into_owned()
}

async fn open_store(tmp: &TempDir) -> Store {
    Store::open(&tmp.path().join("refer.sqlite")).await.unwrap().0
}

async fn add(
    store: &Store,
    embedder: &FakeEmbedder,
    paths: &[String],
    workers: usize,
) -> Vec<IngestError> {
    let cfg = migrate::prepare_for_ingest(store, embedder).await.unwrap();
    let fetcher = Fetcher::new(5).unwrap();
    Ingestor::new(store, embedder, &fetcher, cfg.embedding_size)
        .add_documents(paths, workers)
        .await
}

fn options(limit: usize, threshold: Option<f64>) -> SearchOptions {
    SearchOptions {
        limit,
        threshold,
        metric: Metric::L2,
    }
}

#[tokio::test]
async fn readding_a_path_keeps_one_row_with_latest_content() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;
    let embedder = FakeEmbedder::new("fake", 16);
    let a = write(tmp.path(), "a.txt", "first version");

    assert!(add(&store, &embedder, &[a.clone()], 4).await.is_empty());
    write(tmp.path(), "a.txt", "second version");
    assert!(add(&store, &embedder, &[a.clone()], 4).await.is_empty());

    let docs = store.get_all().await.unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].path, a);
    assert_eq!(docs[0].content, "second version");
    assert_eq!(docs[0].title, a);
    assert!(!docs[0].is_remote);
}

#[tokio::test]
async fn error_count_does_not_depend_on_worker_count() {
    for workers in [1, 3, 16] {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        let embedder = FakeEmbedder::new("fake", 16).failing_on("POISON");

        let mut paths: Vec<String> = (0..6)
            .map(|i| write(tmp.path(), &format!("doc{}.txt", i), &format!("document number {}", i)))
            .collect();
        paths.push(write(tmp.path(), "bad.txt", "this one is POISON"));
        paths.push(tmp.path().join("missing.txt").to_string_lossy().into_owned());
        let bin = tmp.path().join("blob.bin");
        fs::write(&bin, [0u8, 159, 146, 150]).unwrap();
        paths.push(bin.to_string_lossy().into_owned());
        paths.push(tmp.path().to_string_lossy().into_owned());

        let errors = add(&store, &embedder, &paths, workers).await;
        assert_eq!(errors.len(), 2, "workers={}: {:?}", workers, errors);

        let mut failed: Vec<&str> = errors.iter().map(|e| e.path.as_str()).collect();
        failed.sort();
        assert!(failed[0].ends_with("bad.txt"));
        assert!(failed[1].ends_with("missing.txt"));

        assert_eq!(store.stats().await.unwrap().documents, 6);
    }
}

#[tokio::test]
async fn wrong_vector_length_is_an_item_error() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;
    store.init_schema(8).await.unwrap();
    let embedder = FakeEmbedder::new("fake", 4);
    let fetcher = Fetcher::new(5).unwrap();
    let a = write(tmp.path(), "a.txt", "short vectors");

    let errors = Ingestor::new(&store, &embedder, &fetcher, 8)
        .add_documents(&[a], 2)
        .await;
    assert_eq!(errors.len(), 1);
    assert!(matches!(
        errors[0].error.downcast_ref::<EmbeddingError>(),
        Some(EmbeddingError::Dimension {
            expected: 8,
            actual: 4
        })
    ));
    assert_eq!(store.stats().await.unwrap().documents, 0);
}

#[tokio::test]
async fn fresh_store_records_model_and_dimension() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;
    let embedder = FakeEmbedder::new("fake-model", 12);

    add(&store, &embedder, &[write(tmp.path(), "a.txt", "hello")], 1).await;

    assert_eq!(
        store.get_config().await.unwrap(),
        Some(StoredConfig {
            embedding_model: "fake-model".to_string(),
            embedding_size: 12,
        })
    );
    // One probe plus one document.
    assert_eq!(embedder.calls(), 2);
}

#[tokio::test]
async fn model_mismatch_blocks_add_and_search() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;
    let original = FakeEmbedder::new("model-a", 8);
    add(&store, &original, &[write(tmp.path(), "a.txt", "cats")], 1).await;

    let other = FakeEmbedder::new("model-b", 8);
    let err = migrate::prepare_for_ingest(&store, &other).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ReferError>(),
        Some(ReferError::ModelMismatch { .. })
    ));

    let err = search_documents(&store, &other, None, &["cats".to_string()], &options(5, None))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("refer reindex"));
    assert_eq!(other.calls(), 0);
}

#[tokio::test]
async fn dimension_change_under_same_model_name_is_fatal() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;
    let original = FakeEmbedder::new("same-name", 8);
    let paths = vec![
        write(tmp.path(), "a.txt", "cats"),
        write(tmp.path(), "b.txt", "dogs"),
    ];
    assert!(add(&store, &original, &paths, 1).await.is_empty());

    let resized = FakeEmbedder::new("same-name", 4);
    let err = search_documents(&store, &resized, None, &["cats".to_string()], &options(5, None))
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ReferError>(),
        Some(ReferError::DimensionMismatch {
            stored: 8,
            actual: 4,
            ..
        })
    ));
    assert!(err.to_string().contains("refer reindex"));

    let err = migrate::prepare_for_ingest(&store, &resized).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ReferError>(),
        Some(ReferError::DimensionMismatch {
            stored: 8,
            actual: 4,
            ..
        })
    ));
    assert_eq!(store.stats().await.unwrap().documents, 2);
}

#[tokio::test]
async fn reindex_reuses_vectors_of_unchanged_documents() {
    let tmp = TempDir::new().unwrap();
    let (store, _) = Store::open(&tmp.path().join("refer.sqlite")).await.unwrap();
    let embedder = FakeEmbedder::new("fake", 16);
    let paths = vec![
        write(tmp.path(), "a.txt", "alpha beta"),
        write(tmp.path(), "b.txt", "gamma delta"),
        write(tmp.path(), "c.txt", "epsilon zeta"),
    ];
    assert!(add(&store, &embedder, &paths, 2).await.is_empty());
    let before = store.get_all().await.unwrap();

    write(tmp.path(), "b.txt", "gamma delta changed");
    embedder.reset();

    let fetcher = Fetcher::new(5).unwrap();
    let (store, report) = reindex(store, &embedder, &fetcher, &CancelToken::new())
        .await
        .unwrap();

    assert!(!report.full_rebuild);
    assert_eq!(report.original, 3);
    assert_eq!(report.changed, 1);
    assert_eq!(report.dropped, 0);
    // Probe plus the one changed document.
    assert_eq!(embedder.calls(), 2);

    let after = store.get_all().await.unwrap();
    assert_eq!(after.len(), 3);
    for (old, new) in before.iter().zip(after.iter()) {
        assert_eq!(old.id, new.id);
        assert_eq!(old.path, new.path);
        if new.path.ends_with("b.txt") {
            assert_eq!(new.content, "gamma delta changed");
            assert_ne!(old.embedding, new.embedding);
        } else {
            assert_eq!(old.embedding, new.embedding);
        }
    }
}

#[tokio::test]
async fn reindex_with_new_model_rebuilds_everything() {
    let tmp = TempDir::new().unwrap();
    let db = tmp.path().join("refer.sqlite");
    let (store, _) = Store::open(&db).await.unwrap();
    let old = FakeEmbedder::new("old-model", 8);
    let paths = vec![
        write(tmp.path(), "a.txt", "one"),
        write(tmp.path(), "b.txt", "two"),
    ];
    add(&store, &old, &paths, 2).await;

    let new = FakeEmbedder::new("new-model", 24);
    let fetcher = Fetcher::new(5).unwrap();
    let (store, report) = reindex(store, &new, &fetcher, &CancelToken::new())
        .await
        .unwrap();

    assert!(report.full_rebuild);
    assert_eq!(report.changed, 2);
    assert_eq!(
        store.get_config().await.unwrap().unwrap(),
        StoredConfig {
            embedding_model: "new-model".to_string(),
            embedding_size: 24,
        }
    );
    assert!(store
        .get_all()
        .await
        .unwrap()
        .iter()
        .all(|d| d.embedding.len() == 24));

    let hits = search_documents(&store, &new, None, &["one".to_string()], &options(1, None))
        .await
        .unwrap();
    assert!(hits[0].document.path.ends_with("a.txt"));
    assert!(!Path::new(&format!("{}.reindex", db.display())).exists());
}

#[tokio::test]
async fn reindex_drops_documents_that_can_no_longer_be_fetched() {
    let tmp = TempDir::new().unwrap();
    let (store, _) = Store::open(&tmp.path().join("refer.sqlite")).await.unwrap();
    let embedder = FakeEmbedder::new("fake", 8);
    let paths = vec![
        write(tmp.path(), "keep.txt", "keep me"),
        write(tmp.path(), "gone.txt", "delete me"),
    ];
    add(&store, &embedder, &paths, 2).await;
    fs::remove_file(&paths[1]).unwrap();

    let fetcher = Fetcher::new(5).unwrap();
    let (store, report) = reindex(store, &embedder, &fetcher, &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(report.dropped, 1);
    let docs = store.get_all().await.unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].path, paths[0]);
}

#[tokio::test]
async fn failed_reindex_leaves_store_untouched() {
    let tmp = TempDir::new().unwrap();
    let db = tmp.path().join("refer.sqlite");
    let (store, _) = Store::open(&db).await.unwrap();
    let embedder = FakeEmbedder::new("fake", 8);
    let a = write(tmp.path(), "a.txt", "original words");
    add(&store, &embedder, &[a.clone()], 1).await;

    write(tmp.path(), "a.txt", "now POISON inside");
    let failing = FakeEmbedder::new("fake", 8).failing_on("POISON");
    let fetcher = Fetcher::new(5).unwrap();
    let err = reindex(store, &failing, &fetcher, &CancelToken::new())
        .await
        .unwrap_err();
    assert!(format!("{:#}", err).contains("left unchanged"));
    assert!(!Path::new(&format!("{}.reindex", db.display())).exists());

    let (store, is_new) = Store::open(&db).await.unwrap();
    assert!(!is_new);
    let docs = store.get_all().await.unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].content, "original words");
}

#[tokio::test]
async fn reindex_of_empty_store_is_a_no_op() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;
    let embedder = FakeEmbedder::new("fake", 8);
    let fetcher = Fetcher::new(5).unwrap();

    let (_store, report) = reindex(store, &embedder, &fetcher, &CancelToken::new())
        .await
        .unwrap();
    assert_eq!((report.original, report.changed), (0, 0));
    assert_eq!(embedder.calls(), 0);
}

#[tokio::test]
async fn fused_results_keep_each_document_once_at_min_distance() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;
    let embedder = FakeEmbedder::new("fake", 64);
    let paths = vec![
        write(tmp.path(), "cats.txt", "cats purr and nap"),
        write(tmp.path(), "dogs.txt", "dogs bark and fetch"),
        write(tmp.path(), "birds.txt", "birds sing and fly"),
    ];
    add(&store, &embedder, &paths, 3).await;

    let q1 = "cats purr".to_string();
    let q2 = "dogs bark".to_string();
    let single1 = search_documents(&store, &embedder, None, &[q1.clone()], &options(3, None))
        .await
        .unwrap();
    let single2 = search_documents(&store, &embedder, None, &[q2.clone()], &options(3, None))
        .await
        .unwrap();
    let fused = search_documents(&store, &embedder, None, &[q1, q2], &options(3, None))
        .await
        .unwrap();

    assert_eq!(fused.len(), 3);
    let mut seen: Vec<&str> = fused.iter().map(|r| r.document.path.as_str()).collect();
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), 3);

    for hit in &fused {
        let d1 = single1
            .iter()
            .find(|r| r.document.path == hit.document.path)
            .map(|r| r.distance)
            .unwrap();
        let d2 = single2
            .iter()
            .find(|r| r.document.path == hit.document.path)
            .map(|r| r.distance)
            .unwrap();
        assert!((hit.distance - d1.min(d2)).abs() < 1e-9);
    }
    assert!(fused.windows(2).all(|w| w[0].distance <= w[1].distance));
}

#[tokio::test]
async fn threshold_returns_an_ordered_subset() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;
    let embedder = FakeEmbedder::new("fake", 64);
    let paths: Vec<String> = ["red apple", "green apple pie", "blue sky", "apple"]
        .iter()
        .enumerate()
        .map(|(i, text)| write(tmp.path(), &format!("{}.txt", i), text))
        .collect();
    add(&store, &embedder, &paths, 2).await;

    let query = vec!["apple".to_string()];
    let all = search_documents(&store, &embedder, None, &query, &options(10, None))
        .await
        .unwrap();
    let threshold = all[1].distance;
    let some = search_documents(&store, &embedder, None, &query, &options(10, Some(threshold)))
        .await
        .unwrap();

    assert!(!some.is_empty());
    assert!(some.len() < all.len());
    assert!(some.iter().all(|r| r.distance <= threshold));
    let all_paths: Vec<&str> = all.iter().map(|r| r.document.path.as_str()).collect();
    let some_paths: Vec<&str> = some.iter().map(|r| r.document.path.as_str()).collect();
    assert_eq!(some_paths, all_paths[..some_paths.len()]);
}

#[tokio::test]
async fn rerank_supersedes_distance_order() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;
    let embedder = FakeEmbedder::new("fake", 64);
    let paths = vec![
        write(tmp.path(), "near.txt", "rust borrow checker"),
        write(tmp.path(), "far.txt", "gardening tips for spring"),
    ];
    add(&store, &embedder, &paths, 2).await;

    let query = vec!["rust borrow checker".to_string()];
    let plain = search_documents(&store, &embedder, None, &query, &options(2, None))
        .await
        .unwrap();
    let reranked = search_documents(
        &store,
        &embedder,
        Some(&ReverseReranker),
        &query,
        &options(2, None),
    )
    .await
    .unwrap();

    assert!(plain[0].document.path.ends_with("near.txt"));
    assert!(reranked[0].document.path.ends_with("far.txt"));
    assert_eq!(reranked.len(), 2);
}

#[tokio::test]
async fn searching_an_uninitialized_store_embeds_nothing() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;
    let embedder = FakeEmbedder::new("fake", 8);

    let hits = search_documents(&store, &embedder, None, &["anything".to_string()], &options(5, None))
        .await
        .unwrap();
    assert!(hits.is_empty());
    assert_eq!(embedder.calls(), 0);
}

#[tokio::test]
async fn cancelled_batch_adds_nothing() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;
    let embedder = FakeEmbedder::new("fake", 8);
    let cfg = migrate::prepare_for_ingest(&store, &embedder).await.unwrap();
    let paths: Vec<String> = (0..5)
        .map(|i| write(tmp.path(), &format!("{}.txt", i), "text"))
        .collect();

    let cancel = CancelToken::new();
    cancel.cancel();
    let fetcher = Fetcher::new(5).unwrap();
    let errors = Ingestor::new(&store, &embedder, &fetcher, cfg.embedding_size)
        .with_cancel(cancel)
        .add_documents(&paths, 2)
        .await;

    assert_eq!(errors.len(), 5);
    assert!(errors.iter().all(|e| e.is_cancelled()));
    assert_eq!(store.stats().await.unwrap().documents, 0);
}

#[tokio::test]
async fn cancellation_stops_in_flight_work_promptly() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;
    let probe = FakeEmbedder::new("fake", 8);
    let cfg = migrate::prepare_for_ingest(&store, &probe).await.unwrap();
    let embedder = FakeEmbedder::new("fake", 8).slow(Duration::from_secs(30));
    let paths: Vec<String> = (0..4)
        .map(|i| write(tmp.path(), &format!("{}.txt", i), "text"))
        .collect();

    let cancel = CancelToken::new();
    let trip = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trip.cancel();
    });

    let fetcher = Fetcher::new(5).unwrap();
    let started = std::time::Instant::now();
    let errors = Ingestor::new(&store, &embedder, &fetcher, cfg.embedding_size)
        .with_cancel(cancel)
        .add_documents(&paths, 2)
        .await;

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(errors.len(), 4);
    assert!(errors.iter().all(|e| e.is_cancelled()));
}

#[tokio::test]
async fn add_search_remove_round_trip() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;
    let embedder = FakeEmbedder::new("fake", 32);
    let a = write(tmp.path(), "a.txt", "cats are animals");

    assert!(add(&store, &embedder, &[a.clone()], 4).await.is_empty());

    let hits = search_documents(
        &store,
        &embedder,
        None,
        &["feline pets".to_string()],
        &options(1, None),
    )
    .await
    .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].document.path, a);

    store.remove(hits[0].document.id).await.unwrap();
    assert!(store.get_all().await.unwrap().is_empty());

    let err = store.remove(hits[0].document.id).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ReferError>(),
        Some(ReferError::DocumentNotFound(_))
    ));
}
