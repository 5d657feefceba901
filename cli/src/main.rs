//! chainsched CLI: run the event-based job scheduler.
//!
//! # Commands
//! ```text
//! chainsched run   [--jobs <jobs.json>] [--manager-id <id>] [--redis-url <url>]
//! chainsched topic <signature>
//! chainsched info
//! chainsched version
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use chainsched_core::topic::{event_topic, to_hex};
use chainsched_core::{
    Cache, EventPublisher, EventStream, JobDefinition, ManagerBuilder, NoopCache, NoopPublisher,
    SchedulerConfig,
};
use chainsched_evm::{HttpClientConfig, HttpConnector};
use chainsched_redis::{RedisCache, RedisStreamPublisher};

#[derive(Parser)]
#[command(
    name = "chainsched",
    about = "Event-based job scheduler that watches contract events and fires job actions",
    long_about = "
Event-based job scheduler: one worker per job polls its trigger chain for a
contract event and dispatches the job action after block confirmations.

ENVIRONMENT VARIABLES:
  CHAIN_RPC_URLS        chain=url,chain=url  (required for run)
  MAX_WORKERS           maximum concurrent workers (default 100)
  POLL_INTERVAL_SECS    poll interval per worker (default 10)
  BLOCK_CONFIRMATIONS   confirmation depth (default 3)
  RPC_TIMEOUT_SECS      per-request RPC timeout (default 30)
  MANAGER_ID            scheduler instance ID
  REDIS_URL             Redis for event streams and cache (optional)
  LOG_LEVEL             tracing filter directives (default info)
  LOG_JSON              emit JSON logs
",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the scheduler and run until interrupted
    Run(RunArgs),

    /// Print the topic0 hash of an event signature
    Topic {
        /// Canonical signature, e.g. "Transfer(address,address,uint256)"
        signature: String,
    },

    /// Print the effective configuration
    Info,

    /// Print version
    Version,
}

#[derive(Args)]
struct RunArgs {
    /// JSON file with an array of job definitions to schedule at startup
    #[arg(long)]
    jobs: Option<PathBuf>,

    #[arg(long, env = "MANAGER_ID", default_value = "event-scheduler")]
    manager_id: String,

    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => cmd_run(args).await,
        Commands::Topic { signature } => {
            println!("{}", to_hex(event_topic(&signature)));
            Ok(())
        }
        Commands::Info => cmd_info(),
        Commands::Version => {
            println!("chainsched {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

// ─── Command implementations ─────────────────────────────────────────────────

async fn cmd_run(args: RunArgs) -> Result<()> {
    init_tracing(&args.log_level, args.log_json)?;

    let config = SchedulerConfig::from_env().context("invalid scheduler configuration")?;
    if config.chains.is_empty() {
        anyhow::bail!("CHAIN_RPC_URLS is empty, nothing to watch");
    }
    let jobs = match &args.jobs {
        Some(path) => load_jobs(path)?,
        None => Vec::new(),
    };

    let (cache, publisher) = redis_backends(args.redis_url.as_deref()).await;
    let connector = HttpConnector::new(HttpClientConfig {
        request_timeout: config.rpc_timeout(),
    });

    let manager = ManagerBuilder::new(args.manager_id)
        .config(config)
        .cache(cache)
        .publisher(publisher)
        .connect(&connector)
        .await
        .context("failed to start scheduler")?;

    let total = jobs.len();
    let mut scheduled = 0;
    for job in jobs {
        // Rejections are logged and published by the manager.
        if manager.schedule_job(job).await.is_ok() {
            scheduled += 1;
        }
    }
    tracing::info!(scheduled, total, "initial jobs scheduled");

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("interrupt received, shutting down");
                trigger.cancel();
            }
            Err(e) => tracing::error!(error = %e, "failed to listen for interrupt signal"),
        }
    });

    manager.start(shutdown).await;

    let stats = manager.stats();
    tracing::info!(manager_id = %stats.manager_id, "scheduler exited");
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

/// Text logs by default, one JSON object per line with `--log-json`.
fn init_tracing(directives: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_new(directives)
        .with_context(|| format!("invalid LOG_LEVEL directives {directives:?}"))?;
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json().with_current_span(true)))
        .with((!json).then(|| fmt::layer().with_target(false)))
        .try_init()
        .context("tracing subscriber already installed")
}

async fn redis_backends(url: Option<&str>) -> (Arc<dyn Cache>, Arc<dyn EventPublisher>) {
    let Some(url) = url else {
        tracing::info!("REDIS_URL not set, running without cache and event streams");
        return (Arc::new(NoopCache), Arc::new(NoopPublisher));
    };

    match chainsched_redis::connect(url).await {
        Ok(conn) => {
            tracing::info!("connected to Redis");
            (
                Arc::new(RedisCache::new(conn.clone())),
                Arc::new(RedisStreamPublisher::new(conn)),
            )
        }
        Err(e) => {
            tracing::warn!(error = %e, "Redis unavailable, running without cache and event streams");
            (Arc::new(NoopCache), Arc::new(NoopPublisher))
        }
    }
}

fn load_jobs(path: &Path) -> Result<Vec<JobDefinition>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read jobs file {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid jobs file {}", path.display()))
}

fn cmd_info() -> Result<()> {
    let config = SchedulerConfig::from_env().context("invalid scheduler configuration")?;
    let info = serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "config": config,
        "streams": [EventStream::Ready.as_str(), EventStream::Retry.as_str()],
    });
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}
