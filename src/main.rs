//! Review Ledger CLI
//!
//! Command-line tool for chaining review records and inspecting the ledger.

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use review_ledger::chain::{ChainBuilder, ChainVerifier, NewReview};
use review_ledger::config::AppConfig;
use review_ledger::database::Database;
use review_ledger::server;
use review_ledger::store::LedgerStore;

#[derive(Parser)]
#[command(name = "review-ledger")]
#[command(about = "Tamper-evident hash chain for review records")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database URL (overrides configuration)
    #[arg(long, global = true)]
    database_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a review and chain it
    Append {
        /// Movie title
        #[arg(short, long)]
        title: String,

        /// Review text
        #[arg(short = 'x', long)]
        text: String,

        /// Rating from 1 to 5
        #[arg(short, long)]
        rating: i64,

        /// Author user id
        #[arg(short, long)]
        author: i64,
    },

    /// Supersede a review with a new chained revision
    Revise {
        /// Review id to supersede
        id: i64,

        /// New review text
        #[arg(short = 'x', long)]
        text: String,

        /// New rating from 1 to 5
        #[arg(short, long)]
        rating: i64,

        /// Author user id (must own the original)
        #[arg(short, long)]
        author: i64,
    },

    /// Recompute a single review's block hash (content only, not chain continuity)
    VerifyRecord {
        /// Review id
        id: i64,
    },

    /// Show the ledger tail
    Tail,

    /// Show a block and its review
    Show {
        /// Sequence number
        sequence: u64,
    },

    /// Chain stored reviews that predate the ledger
    Backfill,

    /// Run the admin HTTP server
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "review_ledger=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::load()?,
    };
    if let Some(url) = cli.database_url {
        config.database_url = url;
    }

    let database = Database::with_options(
        &config.database_url,
        config.max_connections,
        config.busy_timeout(),
    )
    .await?;
    database.run_migrations().await?;
    let store = Arc::new(database);

    let builder = ChainBuilder::new(store.clone()).with_max_retries(config.max_append_retries);
    let verifier = ChainVerifier::new(store.clone());

    match cli.command {
        Commands::Append {
            title,
            text,
            rating,
            author,
        } => {
            let block = builder
                .append_block(NewReview::new(title, text, rating, author))
                .await?;
            println!("{}", serde_json::to_string_pretty(&block)?);
        }

        Commands::Revise {
            id,
            text,
            rating,
            author,
        } => {
            let block = builder.revise(id, text, rating, author).await?;
            println!("{}", serde_json::to_string_pretty(&block)?);
        }

        Commands::VerifyRecord { id } => {
            let check = verifier.verify_record(id).await?;
            println!("{}", serde_json::to_string_pretty(&check)?);
            println!("Note: content check only; run verify-ledger for chain continuity.");
            if !check.content_intact {
                std::process::exit(1);
            }
        }

        Commands::Tail => match store.get_tail().await? {
            Some(block) => println!("{}", serde_json::to_string_pretty(&block)?),
            None => println!("Ledger is empty"),
        },

        Commands::Show { sequence } => {
            let block = store
                .get_by_sequence(sequence)
                .await?
                .ok_or_else(|| anyhow!("Block {} not found", sequence))?;
            let record = store.get_record(block.record_id).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "block": block,
                    "record": record,
                }))?
            );
        }

        Commands::Backfill => {
            let summary = builder.backfill().await?;
            info!("Chained {} legacy review(s)", summary.count());
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }

        Commands::Serve => {
            server::serve(&config, store).await?;
        }
    }

    Ok(())
}
