//! # GraphChat CLI (`graphchat`)
//!
//! ## Usage
//!
//! ```bash
//! graphchat --config ./config/graphchat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `graphchat init` | Create the SQLite database and run schema migrations |
//! | `graphchat serve` | Start the REST + SSE API server |
//! | `graphchat arxiv search "<query>"` | Preview an arXiv search from the terminal |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use graphchat::{arxiv, config, migrate, server};

/// GraphChat: a session-scoped graph-RAG chat service for PDFs and arXiv
/// papers.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/graphchat.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "graphchat",
    about = "GraphChat: session-scoped knowledge graphs from PDFs and arXiv papers, queried through an LLM retrieval layer",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/graphchat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (sessions, documents, messages). Idempotent.
    Init,

    /// Start the REST + SSE API server.
    ///
    /// Binds to the address configured in `[server].bind`, runs schema
    /// migrations first, and serves until terminated.
    Serve,

    /// arXiv utilities.
    Arxiv {
        #[command(subcommand)]
        action: ArxivAction,
    },
}

/// arXiv subcommands.
#[derive(Subcommand)]
enum ArxivAction {
    /// Search arXiv and print matching papers.
    ///
    /// Preview only: nothing is downloaded or added to a session.
    Search {
        /// The search query string.
        query: String,

        /// Maximum number of results (capped by `[arxiv].max_results`).
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "graphchat=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Arxiv { action } => match action {
            ArxivAction::Search { query, limit } => {
                let client = arxiv::ArxivClient::new(&cfg.arxiv)?;
                let papers = client
                    .search(&query, limit.unwrap_or(cfg.arxiv.max_results))
                    .await?;

                if papers.is_empty() {
                    println!("No results for '{}'.", query);
                    return Ok(());
                }
                for paper in &papers {
                    println!("{}  {}", paper.arxiv_id, paper.title);
                    println!("    authors:   {}", paper.authors.join(", "));
                    if let Some(ref published) = paper.published_at {
                        println!("    published: {}", published);
                    }
                    println!("    pdf:       {}", paper.pdf_url);
                    println!();
                }
            }
        },
    }

    Ok(())
}
