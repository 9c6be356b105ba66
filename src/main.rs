//! chain-relay command line.
//!
//! # Architecture Overview
//!
//! ```text
//!   config (TOML + <CHAIN>_RPC env)
//!        │
//!        ▼
//!   ChainInterface ──► EndpointPool ◄── discovery (registry + probes)
//!        │                  ▲
//!        ▼                  │ rotate
//!   RpcFacade ──► rate limiter ──► active backend ──► JSON-RPC endpoint
//!        ▲
//!        ├── EoaSubmitter   (nonce, fees, gas bump, receipt)
//!        └── SafeExecutor   (estimate, simulate, execute, nonce refresh)
//! ```
//!
//! Commands:
//! - `probe <url>`: one timed `eth_blockNumber`
//! - `discover --chain <name>`: registry candidates that pass validation
//! - `status --chain <name>`: pool, limiter and head block of a chain
//! - `watch`: keep every pool refreshed until Ctrl-C

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::json;

use chain_relay::config::{load_config, RelayConfig};
use chain_relay::discovery::{
    ChainlistRegistry, DiscoveryMonitor, EndpointValidator, HttpProber, Prober, ValidationSettings,
};
use chain_relay::lifecycle::{shutdown_on_ctrl_c, Shutdown};
use chain_relay::observability::logging::init_logging;
use chain_relay::observability::metrics::init_metrics;
use chain_relay::rpc::{HttpBackendFactory, RateLimiterRegistry};
use chain_relay::ChainInterface;

#[derive(Parser)]
#[command(name = "chain-relay")]
#[command(about = "Resilient RPC failover and transaction submission", long_about = None)]
struct Cli {
    /// Configuration file (TOML). Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe a single endpoint
    Probe {
        url: String,
        #[arg(long, default_value_t = 5)]
        timeout_secs: u64,
    },
    /// List registry endpoints that pass validation
    Discover {
        #[arg(long)]
        chain: String,
    },
    /// Show pool and limiter state of a chain
    Status {
        #[arg(long)]
        chain: String,
    },
    /// Refresh every pool periodically until Ctrl-C
    Watch,
}

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() -> CliResult<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => RelayConfig::default(),
    };
    init_logging(&config.observability.log_level);

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let config = Arc::new(config);
    match cli.command {
        Commands::Probe { url, timeout_secs } => probe(&url, timeout_secs).await,
        Commands::Discover { chain } => discover(&config, &chain).await,
        Commands::Status { chain } => status(config, &chain).await,
        Commands::Watch => watch(config).await,
    }
}

fn validator(config: &RelayConfig) -> CliResult<Arc<EndpointValidator>> {
    let registry = ChainlistRegistry::new(&config.discovery)?;
    Ok(Arc::new(EndpointValidator::new(
        Arc::new(registry),
        Arc::new(HttpProber::new()),
        ValidationSettings::from(&config.discovery),
    )))
}

fn factory(config: &RelayConfig) -> Arc<HttpBackendFactory> {
    Arc::new(HttpBackendFactory::new(Duration::from_secs(config.rpc.timeout_secs)))
}

async fn probe(url: &str, timeout_secs: u64) -> CliResult<()> {
    let result = HttpProber::new()
        .probe(url, Duration::from_secs(timeout_secs))
        .await;
    let output = match result {
        Some(probe) => json!({ "url": url, "healthy": true, "probe": probe }),
        None => json!({ "url": url, "healthy": false }),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn discover(config: &RelayConfig, chain: &str) -> CliResult<()> {
    let chain = config
        .chain(chain)
        .ok_or_else(|| format!("unknown chain '{}'", chain))?;
    let mut existing = vec![chain.rpc_url.clone()];
    existing.extend(chain.extra_rpcs.iter().cloned());

    let found = validator(config)?
        .validate_scored(chain.chain_id, &existing, config.discovery.max_endpoints)
        .await;
    println!("{}", serde_json::to_string_pretty(&found)?);
    Ok(())
}

async fn status(config: Arc<RelayConfig>, chain: &str) -> CliResult<()> {
    let chain = config
        .chain(chain)
        .ok_or_else(|| format!("unknown chain '{}'", chain))?
        .clone();
    let limiters = RateLimiterRegistry::new();
    let interface = ChainInterface::connect(&chain, config.clone(), &limiters, factory(&config))?;

    let healthy = interface.facade().check_health().await;
    let block = interface.facade().block_number().await.ok();

    let output = json!({
        "chain": chain.name,
        "chain_id": chain.chain_id,
        "active_url": interface.facade().active_url(),
        "healthy": healthy,
        "block_number": block,
        "endpoints": interface.pool().snapshot(),
        "rate_limiters": limiters.statuses(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn watch(config: Arc<RelayConfig>) -> CliResult<()> {
    if config.chains.is_empty() {
        return Err("no chains configured".into());
    }
    let validator = validator(&config)?;
    let limiters = RateLimiterRegistry::new();
    let factory = factory(&config);

    let mut watched = Vec::with_capacity(config.chains.len());
    for chain in &config.chains {
        let interface = ChainInterface::connect(chain, config.clone(), &limiters, factory.clone())?;
        interface.enrich(&validator).await;
        watched.push(interface.watched());
    }

    let shutdown = Shutdown::new();
    let monitor = DiscoveryMonitor::new(
        watched,
        validator,
        Duration::from_secs(config.discovery.refresh_interval_secs),
    );
    let handle = tokio::spawn(monitor.run(shutdown.subscribe()));

    shutdown_on_ctrl_c(&shutdown).await?;
    handle.await?;
    tracing::info!("Shutdown complete");
    Ok(())
}
