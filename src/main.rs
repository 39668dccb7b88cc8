//! Position Registry Server
//!
//! Hosts the position/membership registry of a network simulation and
//! exposes it to control-plane callers over a REST API.

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use position_registry::metrics::run_metrics_server;
use position_registry::{
    ApiServer, ApiServerConfig, PositionRegistry, RegistryConfig, RegistryMetrics,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Position Registry - node positions and membership for network simulation
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (JSON, or YAML with a .yaml/.yml extension)
    #[arg(long, env = "REGISTRY_CONFIG")]
    config: Option<PathBuf>,

    /// Slot count when no configuration file is given
    #[arg(long, env = "REGISTRY_CAPACITY", default_value = "64")]
    capacity: usize,

    /// REST API bind address (overrides the configuration file)
    #[arg(long, env = "API_ADDR")]
    api_addr: Option<String>,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Allow cross-origin API requests
    #[arg(long, env = "API_CORS")]
    cors: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    info!("Starting Position Registry");
    info!("  Version: {}", position_registry::VERSION);

    let mut config = match &args.config {
        Some(path) => RegistryConfig::from_file(path)
            .with_context(|| format!("failed to load configuration {}", path.display()))?,
        None => RegistryConfig {
            capacity: Some(args.capacity),
            ..Default::default()
        },
    };
    if let Some(addr) = &args.api_addr {
        config.listen_address = addr.clone();
    }

    if let Some(network) = &config.network {
        info!("  Network: {}", network);
    }
    if let Some(mobility) = &config.mobility_manager {
        info!("  Mobility manager: {}", mobility);
    }
    if let Some(link_model) = &config.link_model {
        info!("  Link model: {}", link_model);
    }

    let (registry, addresses) = config.build().context("failed to build position registry")?;
    info!(
        "Position registry initialized ({} slots, {} enabled)",
        registry.capacity(),
        registry.enabled().len()
    );

    spawn_membership_logger(&registry, config.notify_queue_capacity);

    // Start metrics server
    let metrics_addr: SocketAddr = args
        .metrics_addr
        .parse()
        .with_context(|| format!("invalid metrics address {}", args.metrics_addr))?;
    let metrics = Arc::new(
        RegistryMetrics::new(registry.clone()).context("failed to register metrics")?,
    );
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(metrics_addr, metrics).await {
            error!("Metrics server error: {}", e);
        }
    });

    let api_config = ApiServerConfig {
        rest_addr: config.listen_addr().context("invalid API address")?,
        cors_enabled: args.cors,
    };
    let api_server = Arc::new(ApiServer::new(api_config, registry, Some(addresses)));

    let signal_server = api_server.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
        signal_server.shutdown();
    });

    api_server.run().await.context("API server failed")?;

    info!("Position registry shutdown complete");
    Ok(())
}

// =============================================================================
// Membership Logger
// =============================================================================

/// Log every enabled-set change and any updates lost to a full queue
fn spawn_membership_logger(registry: &PositionRegistry, queue_capacity: usize) {
    let (snapshot, mut updates) = registry.subscribe_with_snapshot(queue_capacity);

    tokio::spawn(async move {
        let mut last_sequence = snapshot.sequence;
        while let Some(update) = updates.recv().await {
            if update.sequence != last_sequence + 1 {
                warn!(
                    missed = update.sequence - last_sequence - 1,
                    "Membership logger fell behind"
                );
            }
            last_sequence = update.sequence;

            info!(
                sequence = update.sequence,
                change = %update.change,
                enabled = ?update.enabled,
                "Enabled set changed"
            );
        }
    });
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{},hyper=warn,tower=warn,axum=info",
            level.as_str().to_lowercase()
        ))
    });

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
