//! phunkindex CLI — run and inspect the ethscription indexer.
//!
//! ```bash
//! # Run against a config file
//! phunkindex run --config ./phunkindex.json --db ./phunkindex.db
//!
//! # Run from environment variables (CHAIN_ID, ORIGIN_BLOCK, RPC_URL, …)
//! phunkindex run
//!
//! # Print effective defaults
//! phunkindex info
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use phunkindex_core::config::IndexerConfig;
use phunkindex_engine::Coordinator;
use phunkindex_evm::client::HttpChainClient;
use phunkindex_evm::rpc::RetryPolicy;
use phunkindex_store::{MemoryStore, SqliteStore, Store};

#[derive(Parser)]
#[command(
    name = "phunkindex",
    about = "Reorg-safe ethscription (phunk) indexer",
    version
)]
struct Cli {
    /// Emit JSON structured logs
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the indexer until interrupted
    Run {
        /// Path to a JSON config file; falls back to environment variables
        #[arg(short, long)]
        config: Option<String>,
        /// SQLite database path (":memory:" for an ephemeral run)
        #[arg(short, long, default_value = "phunkindex.db")]
        db: String,
    },
    /// Show effective configuration defaults
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Commands::Run { config, db } => run(config, db).await,
        Commands::Info => {
            cmd_info();
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}

async fn run(config_path: Option<String>, db: String) -> Result<()> {
    let config = match config_path {
        Some(path) => IndexerConfig::from_file(&path),
        None => IndexerConfig::from_env(),
    }
    .context("loading configuration")?;

    let client = Arc::new(
        HttpChainClient::new(
            config.rpc_url.clone(),
            config.provider_url.clone(),
            Duration::from_millis(config.rpc_timeout_ms),
            RetryPolicy::default(),
        )
        .context("building chain client")?,
    );

    let store: Arc<dyn Store> = if db == ":memory:" {
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(SqliteStore::open(&db).await.context("opening database")?)
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown signal received");
                cancel.cancel();
            }
        });
    }

    tracing::info!(
        chain_id = config.chain_id,
        origin = config.origin_block,
        "starting phunkindex"
    );
    let mut coordinator = Coordinator::new(config, client, store, cancel);
    coordinator.run().await?;
    Ok(())
}

fn cmd_info() {
    println!("phunkindex {}", env!("CARGO_PKG_VERSION"));
    println!("  Confirmation depth: 6 blocks");
    println!("  Processed-block window: 30 entries");
    println!("  Block retry: 5 attempts, 5000 ms apart");
    println!("  Head poll interval: 12000 ms");
    println!("  Storage backends: memory, SQLite");
    println!("  Required env: CHAIN_ID ORIGIN_BLOCK RPC_URL MARKET_ADDRESS");
    println!("                AUCTION_ADDRESS POINTS_ADDRESS BRIDGE_ADDRESS");
    println!("  Optional env: PROVIDER_URL ESCROW_ADDRESS COLLECTION_PATH");
    println!("                CONFIRMATIONS BLOCK_HISTORY RETRY_DELAY_MS");
}
