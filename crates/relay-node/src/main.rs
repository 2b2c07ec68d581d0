//! Edge relay node binary
//!
//! Connects to the coordinator named by `RELAY_COORDINATOR` and relays
//! outbound TCP streams on its behalf.

use anyhow::{Context, Result};
use clap::Parser;
use relay_node::{run, NodeConfig};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Edge relay node - opens outbound TCP connections for a remote coordinator
#[derive(Parser, Debug)]
#[command(name = "relay-node")]
#[command(about = "Edge relay node for the proxy fabric", long_about = None)]
#[command(version)]
struct Args {
    /// Coordinator endpoint URL (e.g. wss://coordinator.example.com:3000)
    #[arg(long, env = "RELAY_COORDINATOR")]
    coordinator: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init_logging(log_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level))
        .context("invalid log level")?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Report the missing endpoint and stay alive repeating the warning.
/// Exiting here would put the node into a supervisor restart loop that
/// hides the actual message from the operator.
async fn wait_for_configuration() {
    error!("RELAY_COORDINATOR is not set");
    error!("Configure the coordinator endpoint and restart, e.g.:");
    error!("  RELAY_COORDINATOR=ws://coordinator.example.com:3000");
    error!("  RELAY_COORDINATOR=wss://secure-coordinator.example.com:3000");
    error!("It can also be passed directly: relay-node --coordinator <URL>");

    loop {
        tokio::time::sleep(Duration::from_secs(30)).await;
        warn!("Waiting for coordinator configuration (RELAY_COORDINATOR)");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level)?;

    let Some(endpoint) = args.coordinator else {
        wait_for_configuration().await;
        return Ok(());
    };

    let node_name = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    info!("Starting edge relay node");
    info!("Coordinator: {}", endpoint);
    info!("Node name: {}", node_name);

    let config = NodeConfig {
        endpoint,
        node_name,
    };

    tokio::select! {
        _ = run(config) => {
            error!("Control channel dispatcher stopped unexpectedly");
        }
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => info!("Shutdown signal received, stopping"),
                Err(e) => error!("Error listening for shutdown signal: {}", e),
            }
        }
    }

    info!("Relay node stopped");
    Ok(())
}
