//! # Parley CLI
//!
//! Console retrieval-augmented chat agent. Commands cover database setup,
//! document ingestion, one-off retrieval queries, tool inspection, and the
//! interactive chat loop.
//!
//! ## Usage
//!
//! ```bash
//! parley --config ./config/parley.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `parley init` | Create the SQLite database and run schema migrations |
//! | `parley ingest` | Ingest documents from the configured folder |
//! | `parley query "<text>"` | Run a one-off retrieval query |
//! | `parley tools list` | List the tools exposed to the chat model |
//! | `parley chat` | Start the interactive chat session |
//!
//! `chat` runs an ingestion pass on startup so newly dropped files are
//! searchable before the first question.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use parley::chat::ChatSession;
use parley::config::{self, Config};
use parley::embedding::{self, EmbeddingProvider};
use parley::index::qdrant::QdrantIndex;
use parley::index::VectorIndex;
use parley::retrieval::RetrievalService;
use parley::tools::builtin_registry;
use parley::{db, ingest, migrate, store};

/// Parley — a console chat agent with document retrieval and
/// token-budgeted conversation memory.
#[derive(Parser)]
#[command(
    name = "parley",
    about = "A console retrieval-augmented chat agent",
    version,
    long_about = "Parley ingests local documents (PDF, PowerPoint, plain text) into a vector \
    index, then answers questions in an interactive chat session. The model can search the \
    ingested documents, query the chat database, and run sandboxed Lua snippets via function \
    calling. Long conversations are kept within the model's context window by summarizing \
    older turns."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/parley.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the `chat_messages` and
    /// `ingested_files` tables. Idempotent.
    Init,

    /// Ingest documents from the configured folder.
    ///
    /// Extracts text, chunks it with overlap, embeds each chunk, and writes
    /// passages to the vector index. Files already in the ingestion ledger
    /// are skipped by filename.
    Ingest,

    /// Run a one-off retrieval query and print the matching passages.
    Query {
        /// The query text.
        text: String,

        /// Maximum number of passages to return.
        #[arg(long)]
        top_k: Option<usize>,

        /// Minimum similarity score, 0.0 to 1.0.
        #[arg(long)]
        threshold: Option<f32>,
    },

    /// Inspect the tools exposed to the chat model.
    Tools {
        #[command(subcommand)]
        action: ToolsAction,
    },

    /// Start the interactive chat session.
    Chat,
}

#[derive(Subcommand)]
enum ToolsAction {
    /// List allowed tools with their descriptions.
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg.db.path).await?;
            migrate::run_migrations(&pool).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest => {
            let pool = db::connect(&cfg.db.path).await?;
            migrate::run_migrations(&pool).await?;
            run_ingest_pass(&cfg, &pool).await?;
        }
        Commands::Query {
            text,
            top_k,
            threshold,
        } => {
            let retrieval = build_retrieval(&cfg)?;
            let matches = retrieval
                .query(
                    &text,
                    top_k.unwrap_or(cfg.retrieval.top_k),
                    threshold.unwrap_or(cfg.retrieval.score_threshold),
                )
                .await?;

            if matches.is_empty() {
                println!("No passages matched.");
            }
            for (i, m) in matches.iter().enumerate() {
                println!("{}. [{:.3}] {}", i + 1, m.score, m.filename);
                println!("   {}", m.text);
            }
        }
        Commands::Tools { action } => match action {
            ToolsAction::List => {
                let pool = db::connect(&cfg.db.path).await?;
                migrate::run_migrations(&pool).await?;
                let retrieval = Arc::new(build_retrieval(&cfg)?);
                let registry = builtin_registry(&cfg, retrieval, pool);
                if registry.is_empty() {
                    println!("No tools allowed.");
                }
                for name in registry.names() {
                    let tool = registry.find(name).unwrap();
                    println!("{} — {}", tool.name(), tool.description());
                }
            }
        },
        Commands::Chat => {
            let pool = db::connect(&cfg.db.path).await?;
            migrate::run_migrations(&pool).await?;

            // Pick up files dropped since the last session.
            run_ingest_pass(&cfg, &pool).await?;

            let retrieval = Arc::new(build_retrieval(&cfg)?);
            let registry = builtin_registry(&cfg, retrieval, pool.clone());
            let session = ChatSession::new(&cfg, pool, registry)?;
            session.run().await?;
        }
    }

    Ok(())
}

fn build_retrieval(cfg: &Config) -> Result<RetrievalService> {
    let index: Arc<dyn VectorIndex> =
        Arc::new(QdrantIndex::new(&cfg.index, &cfg.retrieval.collection)?);
    let embedder: Arc<dyn EmbeddingProvider> = embedding::create_provider(&cfg.embedding)?.into();
    Ok(RetrievalService::new(index, embedder))
}

/// One ingestion pass over the configured folder; skipped when embeddings
/// are disabled.
async fn run_ingest_pass(cfg: &Config, pool: &sqlx::SqlitePool) -> Result<()> {
    if !cfg.embedding.is_enabled() {
        warn!("Embedding provider is disabled; skipping ingestion");
        return Ok(());
    }
    if !cfg.ingestion.folder.is_dir() {
        warn!(
            "Ingestion folder {} does not exist; skipping ingestion",
            cfg.ingestion.folder.display()
        );
        return Ok(());
    }

    let index = QdrantIndex::new(&cfg.index, &cfg.retrieval.collection)?;
    let embedder = embedding::create_provider(&cfg.embedding)?;
    let report = ingest::run_ingest(&cfg.ingestion, pool, &index, embedder.as_ref()).await?;

    println!(
        "Ingested {} file(s) ({} passages), skipped {}, failed {}. {} file(s) in ledger.",
        report.files_ingested,
        report.passages_written,
        report.files_skipped,
        report.files_failed,
        store::ingested_file_count(pool).await?,
    );
    Ok(())
}
