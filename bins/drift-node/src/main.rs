//! Drift node binary.
//!
//! Loads the configuration, serves the JSON-RPC API, synchronises with the
//! configured seeds, then validates and verifies blocks on the shared
//! wall-clock schedule until Ctrl+C.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use drift_core::types::Address;
use drift_node_lib::{Node, NodeConfig, start_rpc_server};
use tracing::info;

/// Drift node: a ledger whose balances drift back to the commons.
#[derive(Parser, Debug)]
#[command(name = "drift-node", version, about = "Drift validator node with JSON-RPC server")]
struct Args {
    /// Configuration file (TOML or JSON). Defaults to drift.toml in the data directory.
    #[arg(long)]
    config: Option<PathBuf>,

    /// RPC server bind address
    #[arg(long)]
    rpc_bind: Option<String>,

    /// RPC server port
    #[arg(long)]
    rpc_port: Option<u16>,

    /// Address under which neighbors reach this node (host:port)
    #[arg(long)]
    host_target: Option<String>,

    /// Seed nodes (comma-separated host:port)
    #[arg(long, value_delimiter = ',')]
    seeds: Vec<String>,

    /// Validator address (64 hex characters) credited with block rewards
    #[arg(long)]
    validator: Option<Address>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format ("text" or "json")
    #[arg(long, default_value = "text")]
    log_format: String,
}

impl Args {
    /// Load the configuration file and apply the CLI overrides on top.
    fn into_config(self) -> Result<(NodeConfig, String)> {
        let mut config = NodeConfig::load(self.config.as_deref()).context("loading configuration")?;

        if let Some(rpc_bind) = self.rpc_bind {
            config.rpc_bind = rpc_bind;
        }
        if let Some(rpc_port) = self.rpc_port {
            config.rpc_port = rpc_port;
        }
        if let Some(host_target) = self.host_target {
            config.network.host_target = host_target;
        }
        if !self.seeds.is_empty() {
            config.network.seeds = self.seeds;
        }
        if let Some(validator) = self.validator {
            config.validator.address = Some(validator);
        }
        if let Some(log_level) = self.log_level {
            config.log_level = log_level;
        }

        Ok((config, self.log_format))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let (config, log_format) = Args::parse().into_config()?;
    init_logging(&config.log_level, &log_format);

    info!("Drift Node v{}", env!("CARGO_PKG_VERSION"));
    info!("rpc_addr: {}", config.rpc_addr());
    info!("host_target: {}", config.network.host_target);
    info!("seeds: {:?}", config.network.seeds);
    match config.validator.address {
        Some(address) => info!("validating for address {address}"),
        None => info!("no validator address configured, verifying only"),
    }

    let rpc_addr = config.rpc_addr();
    let node = Node::new(config);

    let rpc_handle = start_rpc_server(&rpc_addr, node.clone())
        .await
        .context("starting RPC server")?;
    info!("RPC server listening on {rpc_addr}");

    node.synchronize().await;
    let schedulers = node.schedulers();
    schedulers.start();

    info!("Drift node running (Ctrl+C to stop)");
    tokio::signal::ctrl_c()
        .await
        .context("installing Ctrl+C handler")?;
    info!("received Ctrl+C, shutting down...");

    schedulers.stop();
    rpc_handle.stop().ok();
    info!("Drift node shutdown complete");
    Ok(())
}

/// Initialize tracing subscriber with the given log level and output format.
///
/// `format = "json"` selects structured JSON output; any other value gives
/// human-readable text. `RUST_LOG` takes precedence over `level_str`.
fn init_logging(level_str: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_str));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
