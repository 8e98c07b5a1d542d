//! proofindex CLI
//!
//! Usage:
//!   proofindex run --config proofindex.json --rpc-url https://rpc.example
//!   proofindex status --config proofindex.json
//!   proofindex unlock --config proofindex.json
//!   proofindex classify --verifier 0x... 0x<tx hash>
//!   proofindex info

mod logging;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use proofindex_core::{IndexerConfig, StateStore, VerifierConfig};
use proofindex_evm::{EventKind, IndexerBuilder, ProofClassifier, VerifierRegistry};
use proofindex_rpc::{ChainReader, HttpRpcClient, RpcChainReader};
use proofindex_storage::{InMemoryStateStore, PostgresStateStore};

#[derive(Parser)]
#[command(
    name = "proofindex",
    about = "Rollup batch lifecycle indexer",
    long_about = "Indexes proposal, proof, verification and conflict events of a rollup inbox\n\
                  into Postgres, attributing every proof to the proof systems that produced it.",
    version
)]
struct Cli {
    /// Log filter directive (overridden by RUST_LOG)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one indexing pass and print its report
    Run {
        #[command(flatten)]
        config: ConfigArgs,
        #[command(flatten)]
        store: StoreArgs,
        /// JSON-RPC endpoint
        #[arg(long, env = "PROOFINDEX_RPC_URL")]
        rpc_url: String,
    },

    /// Print the cursor row of the configured chain
    Status {
        #[command(flatten)]
        config: ConfigArgs,
        #[command(flatten)]
        store: StoreArgs,
    },

    /// Clear a stuck run lock
    Unlock {
        #[command(flatten)]
        config: ConfigArgs,
        #[command(flatten)]
        store: StoreArgs,
    },

    /// Show which proof systems back a proof transaction
    Classify {
        /// Proof transaction hash
        tx: String,
        /// Verifier address emitted in the BatchesProved event
        #[arg(long)]
        verifier: String,
        #[command(flatten)]
        config: ConfigArgs,
        /// JSON-RPC endpoint
        #[arg(long, env = "PROOFINDEX_RPC_URL")]
        rpc_url: String,
    },

    /// Show indexed events and supported proof systems
    Info,
}

#[derive(Args)]
struct ConfigArgs {
    /// Indexer config file (JSON)
    #[arg(long, short, env = "PROOFINDEX_CONFIG")]
    config: Option<PathBuf>,

    /// Verifier mapping file (JSON); replaces the config's `verifiers`
    #[arg(long)]
    verifiers: Option<PathBuf>,
}

#[derive(Args)]
struct StoreArgs {
    /// Postgres URL; the in-memory store is used when absent
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(&cli.log_level, cli.json_logs);

    match cli.command {
        Commands::Run {
            config,
            store,
            rpc_url,
        } => cmd_run(&config, &store, &rpc_url).await,
        Commands::Status { config, store } => cmd_status(&config, &store).await,
        Commands::Unlock { config, store } => cmd_unlock(&config, &store).await,
        Commands::Classify {
            tx,
            verifier,
            config,
            rpc_url,
        } => cmd_classify(&tx, &verifier, &config, &rpc_url).await,
        Commands::Info => {
            cmd_info();
            Ok(())
        }
    }
}

// ─── run ──────────────────────────────────────────────────────────────────────

async fn cmd_run(args: &ConfigArgs, store_args: &StoreArgs, rpc_url: &str) -> Result<()> {
    let config = load_config(args, true)?;
    let reader = open_reader(rpc_url)?;
    let store = open_store(store_args, true).await?;

    let mut indexer = IndexerBuilder::from_config(config)
        .reader(reader)
        .store(store)
        .build()
        .context("building indexer")?;

    let report = indexer.run().await.context("indexer run failed")?;
    if report.skipped {
        info!("another run holds the lock, nothing done");
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

// ─── status / unlock ──────────────────────────────────────────────────────────

async fn cmd_status(args: &ConfigArgs, store_args: &StoreArgs) -> Result<()> {
    let config = load_config(args, false)?;
    let store = open_store(store_args, false).await?;

    match store.cursor(config.chain_id).await? {
        Some(cursor) => println!("{}", serde_json::to_string_pretty(&cursor)?),
        None => println!("no cursor for chain {}", config.chain_id),
    }
    Ok(())
}

async fn cmd_unlock(args: &ConfigArgs, store_args: &StoreArgs) -> Result<()> {
    let config = load_config(args, false)?;
    let store = open_store(store_args, false).await?;

    if store.force_release(config.chain_id, chrono::Utc::now()).await? {
        println!("lock released for chain {}", config.chain_id);
    } else {
        println!("chain {} was not locked", config.chain_id);
    }
    Ok(())
}

// ─── classify ─────────────────────────────────────────────────────────────────

async fn cmd_classify(tx: &str, verifier: &str, args: &ConfigArgs, rpc_url: &str) -> Result<()> {
    let config = load_config(args, false)?;
    let reader = open_reader(rpc_url)?;
    let registry = Arc::new(VerifierRegistry::from_config(&config.verifiers));
    let classifier = ProofClassifier::new(registry, reader);

    let result = classifier
        .classify_tx(&verifier.to_lowercase(), &tx.to_lowercase())
        .await
        .with_context(|| format!("fetching {tx}"))?;

    let out = serde_json::json!({
        "tx": tx,
        "verifier": verifier,
        "proof_systems": result.proof_systems,
        "variants": result.variants,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

// ─── info ─────────────────────────────────────────────────────────────────────

fn cmd_info() {
    println!("proofindex v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Indexed events:");
    for kind in EventKind::ALL {
        println!("  {:<18} {}", kind.name(), kind.topic0());
    }
    println!();
    println!("Proof systems: tee, sp1, risc0");
    println!("Stores:        postgres, memory");
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

fn load_config(args: &ConfigArgs, validate: bool) -> Result<IndexerConfig> {
    let mut config = match &args.config {
        Some(path) => IndexerConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => IndexerConfig::default(),
    };
    config.apply_env().context("applying PROOFINDEX_* overrides")?;

    if let Some(path) = &args.verifiers {
        config.verifiers = load_verifiers(path)?;
    }
    if validate {
        config.validate().context("invalid configuration")?;
    }
    Ok(config)
}

fn load_verifiers(path: &Path) -> Result<VerifierConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading verifier mapping {}", path.display()))?;
    Ok(VerifierConfig::from_json_str(&raw)?)
}

fn open_reader(rpc_url: &str) -> Result<Arc<dyn ChainReader>> {
    let client = HttpRpcClient::default_for(rpc_url)
        .with_context(|| format!("creating RPC client for {rpc_url}"))?;
    Ok(Arc::new(RpcChainReader::new(client)))
}

async fn open_store(args: &StoreArgs, allow_memory: bool) -> Result<Arc<dyn StateStore>> {
    match &args.database_url {
        Some(url) => {
            let store = PostgresStateStore::connect(url)
                .await
                .context("connecting to Postgres")?;
            Ok(Arc::new(store))
        }
        None if allow_memory => {
            warn!("no --database-url given, indexing into memory; state is dropped on exit");
            Ok(Arc::new(InMemoryStateStore::new()))
        }
        None => bail!("--database-url (or DATABASE_URL) is required for this command"),
    }
}
