//! # refer
//!
//! A local semantic index for files, directories and web pages.
//!
//! Documents are fetched, embedded through an HTTP embedding service, and kept
//! in a single SQLite file together with the model that produced their
//! vectors. Search embeds one or more queries, fuses the nearest neighbours of
//! each, and can hand the result to a reranker.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌────────────┐   ┌──────────┐
//! │  paths   │──▶│  fetch    │──▶│  ingest    │──▶│  store   │
//! │ (expand) │   │ file/URL  │   │ embed pool │   │  SQLite  │
//! └──────────┘   └───────────┘   └────────────┘   └────┬─────┘
//!                                                      │
//!                        ┌─────────────────────────────┤
//!                        ▼                             ▼
//!                 ┌─────────────┐               ┌────────────┐
//!                 │   search    │               │  reindex   │
//!                 │ fuse+rerank │               │ temp+swap  │
//!                 └─────────────┘               └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! refer add ~/notes https://example.com/article
//! refer search "how do I rotate keys" "key rotation" --limit 3
//! refer show
//! refer reindex                  # after changing the embedding model
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation and model drift checks |
//! | [`store`] | Document persistence and nearest-neighbour lookup |
//! | [`embedding`] | Embedding provider abstraction and vector helpers |
//! | [`paths`] | Input expansion (directory walk, ignore rules) |
//! | [`fetch`] | Local/remote document fetching |
//! | [`youtube`] | Caption transcripts for YouTube URLs |
//! | [`ingest`] | Concurrent embedding worker pool |
//! | [`reindex`] | Atomic store rebuild |
//! | [`search`] | Multi-query search fusion |
//! | [`rerank`] | Reranking collaborator |
//! | [`show`] | Listing, lookup and removal |
//! | [`stats`] | Store statistics |
//! | [`progress`] | Ingestion progress reporting |
//! | [`lock`] | Store write lock |

pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod fetch;
pub mod ingest;
pub mod lock;
pub mod migrate;
pub mod models;
pub mod paths;
pub mod progress;
pub mod reindex;
pub mod rerank;
pub mod search;
pub mod show;
pub mod stats;
pub mod store;
pub mod youtube;
