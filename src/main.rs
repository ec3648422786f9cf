//! # refer CLI
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `refer add <path>...` | Add files, directories or URLs |
//! | `refer search <query>...` | Search with one or more queries |
//! | `refer show [id]` | List documents, or print one |
//! | `refer stats` | Store statistics |
//! | `refer reindex` | Re-embed documents after a model change or content edits |
//! | `refer remove <id>` | Remove a document |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use refer::config;
use refer::ingest::{self, CancelToken};
use refer::progress::ProgressMode;
use refer::search::{self, OutputFormat};
use refer::{reindex, show, stats};

/// refer: a local semantic index for files, directories and web pages.
#[derive(Parser)]
#[command(name = "refer", version)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `<config dir>/refer/config.toml`; a missing file means defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Store file, overriding `[db] path`.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Log debug output to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add files, directories (recursively) or URLs.
    Add {
        #[arg(required = true)]
        paths: Vec<String>,

        /// Override `[ingest] max_workers`.
        #[arg(long)]
        workers: Option<usize>,

        /// Progress on stderr: human, json, or off. Defaults to human on a TTY.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Search for documents. Several queries are fused into one result list.
    Search {
        #[arg(required = true)]
        queries: Vec<String>,

        /// Output format: names, llm, or json.
        #[arg(long, default_value = "names")]
        format: String,

        /// Maximum number of results. Defaults to `[retrieval] limit`.
        #[arg(long)]
        limit: Option<usize>,

        /// Drop results further away than this distance.
        #[arg(long)]
        threshold: Option<f64>,

        /// Reorder results with the configured reranker.
        #[arg(long)]
        rerank: bool,
    },

    /// List documents, or show one by id.
    Show { id: Option<i64> },

    /// Show store statistics.
    Stats,

    /// Re-embed stored documents against the configured model.
    Reindex,

    /// Remove a document by id.
    Remove { id: i64 },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "refer=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Trip the token on Ctrl-C so workers stop at their next suspension point.
fn cancel_on_ctrl_c() -> CancelToken {
    let cancel = CancelToken::new();
    let trip = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted, stopping...");
            trip.cancel();
        }
    });
    cancel
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut cfg = config::load_config(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        cfg.db.path = db;
    }
    tracing::debug!(db = %cfg.db.path.display(), "using store");

    match cli.command {
        Commands::Add {
            paths,
            workers,
            progress,
        } => {
            if let Some(w) = workers {
                if w == 0 {
                    anyhow::bail!("--workers must be > 0");
                }
                cfg.ingest.max_workers = w;
            }
            let mode = match progress.as_deref() {
                None => ProgressMode::default_for_tty(),
                Some(value) => ProgressMode::parse(value).ok_or_else(|| {
                    anyhow::anyhow!("Unknown progress mode: {}. Use human, json, or off.", value)
                })?,
            };
            ingest::run_add(&cfg, &paths, mode, cancel_on_ctrl_c()).await?;
        }
        Commands::Search {
            queries,
            format,
            limit,
            threshold,
            rerank,
        } => {
            let format: OutputFormat = format.parse()?;
            if limit == Some(0) {
                anyhow::bail!("--limit must be >= 1");
            }
            search::run_search(&cfg, &queries, format, limit, threshold, rerank).await?;
        }
        Commands::Show { id } => {
            show::run_show(&cfg, id).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Reindex => {
            reindex::run_reindex(&cfg, cancel_on_ctrl_c()).await?;
        }
        Commands::Remove { id } => {
            show::run_remove(&cfg, id).await?;
        }
    }

    Ok(())
}
