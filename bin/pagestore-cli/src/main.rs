//! pagestore CLI - drives the versioned object core against an in-process
//! backend
//!
//! `scenario` walks through create, append, overwrite and read and prints the
//! resulting page locations. `bench` runs concurrent writers and pinned
//! readers against one object and reports throughput.

mod bench;
mod scenario;

use anyhow::Result;
use clap::{Parser, Subcommand};
use pagestore_common::Config;
use pagestore_core::{MemoryBackend, ReadPolicy, VersionStore};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "pagestore-cli")]
#[command(about = "Versioned paged object store driver")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "pagestore.toml")]
    config: String,

    /// Log level (overrides the config file)
    #[arg(long)]
    log_level: Option<String>,

    /// Storage provider endpoints, host:port (overrides the config file)
    #[arg(long, value_delimiter = ',')]
    providers: Vec<String>,

    /// Page size in bytes for new objects (overrides the config file)
    #[arg(long)]
    page_size: Option<u64>,

    /// Replicas per page for new objects (overrides the config file)
    #[arg(long)]
    replication: Option<u32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the append / overwrite / read walk-through
    Scenario {
        /// Print page locations as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run a concurrent writer and reader workload
    Bench(bench::BenchArgs),
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config: Config = if std::path::Path::new(&args.config).exists() {
        let config_str = std::fs::read_to_string(&args.config)?;
        toml::from_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file {}: {}", args.config, e))?
    } else {
        Config::default()
    };

    // CLI takes precedence over the file
    if let Some(level) = &args.log_level {
        config.logging.level.clone_from(level);
    }
    if !args.providers.is_empty() {
        config.backend.providers.clone_from(&args.providers);
    }
    if let Some(page_size) = args.page_size {
        config.store.page_size = page_size;
    }
    if let Some(replication) = args.replication {
        config.store.replication_count = replication;
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let backend = Arc::new(MemoryBackend::from_config(&config.backend)?);
    info!(
        "Backend ready with {} providers: {}",
        backend.provider_count(),
        backend.provider_endpoints().join(", ")
    );

    let store = Arc::new(VersionStore::with_read_policy(
        backend.clone(),
        ReadPolicy::from(&config.client),
    ));

    match args.command {
        Commands::Scenario { json } => scenario::run(store, &config, json).await?,
        Commands::Bench(bench_args) => bench::run(store, &config, &bench_args).await?,
    }

    info!(
        "Backend holds {} pages, {} bytes",
        backend.page_count(),
        backend.stored_bytes()
    );
    Ok(())
}
