//! roundmirror indexer - mirrors voting rounds and certificates into SQLite
//!
//! This binary provides:
//! - Scheduled iteration and cert snapshot indexing
//! - Single-tick runs for operators
//! - Store status and checkpoint inspection

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use roundmirror_indexer::chain::ChainPollerSet;
use roundmirror_indexer::config::{Config, LoggingConfig};
use roundmirror_indexer::content::{ContentCache, IpfsFetcher};
use roundmirror_indexer::retry::RetryTracker;
use roundmirror_indexer::scheduler::Scheduler;
use roundmirror_indexer::snapshot::{CertSnapshotIndexer, IterationSnapshotIndexer, TickReport};
use roundmirror_indexer::storage::Storage;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "roundmirror-indexer")]
#[command(version, about = "Snapshot indexer for voting rounds and certificates", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "indexer.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Schedule both sub-indexers until Ctrl+C
    Run,

    /// Run a single tick and exit
    Once {
        /// Which sub-indexer to tick
        #[arg(value_enum, default_value_t = OnceTarget::All)]
        target: OnceTarget,
    },

    /// Show store statistics and scan checkpoints
    Status,

    /// Initialize the database
    InitDb {
        /// Database URL
        #[arg(long, default_value = "sqlite://roundmirror.db")]
        database_url: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OnceTarget {
    Iterations,
    Certs,
    All,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Run);

    let config = match &command {
        Commands::InitDb { .. } => None,
        _ => Some(Config::from_file(&cli.config).context("Failed to load configuration")?),
    };

    let logging = config
        .as_ref()
        .map(|c| c.logging.clone())
        .unwrap_or_default();
    init_logging(cli.debug, &logging)?;

    info!("roundmirror indexer starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    match (command, config) {
        (Commands::Run, Some(config)) => run_indexer(config).await?,
        (Commands::Once { target }, Some(config)) => run_once(config, target).await?,
        (Commands::Status, Some(config)) => show_status(config).await?,
        (Commands::InitDb { database_url }, _) => init_database(&database_url).await?,
        (_, None) => anyhow::bail!("Configuration required"),
    }

    Ok(())
}

/// Initialize tracing subscriber for logging
fn init_logging(debug: bool, logging: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = if debug {
        EnvFilter::new("roundmirror_indexer=debug,roundmirror_core=debug,sqlx=debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("roundmirror_indexer={}", logging.level)))
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    if logging.format == "json" {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .init();
    }

    Ok(())
}

async fn open_storage(config: &Config) -> Result<Storage> {
    let storage = Storage::new(
        &config.database.url,
        Some(config.database.max_connections),
        Some(config.database.min_connections),
    )
    .await
    .context("Failed to connect to database")?;

    storage
        .run_migrations()
        .await
        .context("Failed to run migrations")?;

    Ok(storage)
}

/// Wire both sub-indexers over one shared content cache.
fn build_indexers(
    config: &Config,
    storage: Storage,
) -> Result<(IterationSnapshotIndexer, CertSnapshotIndexer)> {
    let pollers = ChainPollerSet::from_config(config).context("Failed to open RPC clients")?;

    let fetcher = IpfsFetcher::new(
        &config.content.gateway,
        config.content.max_bytes,
        config.content.timeout_secs,
    )
    .context("Failed to create content fetcher")?;
    let retry = RetryTracker::new(storage.clone(), config.retry.policy());
    let content = ContentCache::new(storage.clone(), retry, Arc::new(fetcher));

    let iterations =
        IterationSnapshotIndexer::new(storage.clone(), content.clone(), pollers.clone());
    let certs = CertSnapshotIndexer::new(storage, content, pollers, config.certs.log_batch_size);

    Ok((iterations, certs))
}

fn log_config(config: &Config) {
    info!("Configuration loaded successfully");
    info!("  Database: {}", config.database.url);
    info!("  Content gateway: {}", config.content.gateway);
    for network in &config.networks {
        info!(
            "  Network {}: iteration registry {}, cert registry {}",
            network.label(),
            network.iteration_registry,
            network
                .cert_registry
                .map(|a| a.to_string())
                .unwrap_or_else(|| "none".to_string())
        );
    }
    if let Some(chain_id) = config.single_network {
        info!("  Restricted to network {}", chain_id);
    }
}

/// Main indexer service - schedules both sub-indexers
async fn run_indexer(config: Config) -> Result<()> {
    log_config(&config);

    let storage = open_storage(&config).await?;
    info!("Database initialized");

    let (iterations, certs) = build_indexers(&config, storage.clone())?;

    let iteration_scheduler = Scheduler::new(Arc::new(iterations), config.iterations_interval());
    let iteration_handle = tokio::spawn(async move { iteration_scheduler.run().await });

    let cert_scheduler = Scheduler::new(Arc::new(certs), config.certs_interval());
    let cert_handle = tokio::spawn(async move { cert_scheduler.run().await });

    info!("Indexer is running. Press Ctrl+C to stop.");

    tokio::select! {
        result = iteration_handle => {
            storage.close().await;
            match result {
                Ok(Ok(())) => {
                    warn!("Iteration scheduler exited unexpectedly");
                    Ok(())
                }
                Ok(Err(e)) => Err(e).context("Iteration scheduler failed"),
                Err(e) => Err(anyhow::anyhow!("Iteration scheduler task panicked: {}", e)),
            }
        }
        result = cert_handle => {
            storage.close().await;
            match result {
                Ok(Ok(())) => {
                    warn!("Cert scheduler exited unexpectedly");
                    Ok(())
                }
                Ok(Err(e)) => Err(e).context("Cert scheduler failed"),
                Err(e) => Err(anyhow::anyhow!("Cert scheduler task panicked: {}", e)),
            }
        }
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl+C")?;
            info!("Received shutdown signal, gracefully shutting down...");
            storage.close().await;
            Ok(())
        }
    }
}

/// Run one tick of the selected sub-indexers
async fn run_once(config: Config, target: OnceTarget) -> Result<()> {
    log_config(&config);

    let storage = open_storage(&config).await?;
    let (iterations, certs) = build_indexers(&config, storage.clone())?;

    let mut report = TickReport::default();
    if matches!(target, OnceTarget::Iterations | OnceTarget::All) {
        report.merge(iterations.run_tick().await?);
    }
    if matches!(target, OnceTarget::Certs | OnceTarget::All) {
        report.merge(certs.run_tick().await?);
    }

    println!("{}", report);

    storage.close().await;
    Ok(())
}

/// Show store statistics and scan checkpoints
async fn show_status(config: Config) -> Result<()> {
    info!("Checking indexer status");

    let storage = open_storage(&config).await?;

    let stats = storage.stats().await?;
    let checkpoints = storage.list_checkpoints().await?;

    println!("\n=== roundmirror Indexer Status ===\n");
    println!("Database Statistics:");
    println!("  Round Snapshots: {}", stats.round_count);
    println!("  Certificates: {}", stats.cert_count);
    println!("  Team Members: {}", stats.team_member_count);
    println!("  Eligibility Rows: {}", stats.eligibility_count);
    println!("  Profiles: {}", stats.profile_count);
    println!("  Cached Content: {}", stats.cached_content_count);
    println!("  Pending Retries: {}", stats.pending_retry_count);

    println!("\nNetworks:");
    for network in &config.networks {
        let rounds = storage.list_round_snapshots(network.chain_id).await?;
        let max_token = storage.max_cert_token_id(network.chain_id).await?;
        println!(
            "  {}: {} rounds, highest cert token {}",
            network.label(),
            rounds.len(),
            max_token
        );
    }

    if checkpoints.is_empty() {
        println!("\nNo event scans started yet.");
    } else {
        println!("\nScan Checkpoints:");
        for checkpoint in checkpoints {
            println!(
                "  chain {} source {}: next block {}",
                checkpoint.chain_id, checkpoint.source, checkpoint.next_block
            );
        }
    }

    println!();

    storage.close().await;
    Ok(())
}

/// Initialize the database
async fn init_database(database_url: &str) -> Result<()> {
    info!("Initializing database: {}", database_url);

    let storage = Storage::new(database_url, None, None)
        .await
        .context("Failed to connect to database")?;

    storage
        .run_migrations()
        .await
        .context("Failed to run migrations")?;

    storage
        .health_check()
        .await
        .context("Database health check failed")?;

    let stats = storage.stats().await?;
    info!("Database initialized successfully!");
    info!("  Round snapshots: {}", stats.round_count);
    info!("  Certificates: {}", stats.cert_count);

    storage.close().await;

    Ok(())
}
