//! permweave daemon
//!
//! Loads every group, then keeps the caches tidy until interrupted.
//!
//! # Usage
//!
//! ```bash
//! # With config file
//! permweave --config permweave.yaml
//!
//! # With environment variables only
//! PERMWEAVE_SERVER__NAME=lobby permweave
//! ```

use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};

use permweave_server::observability::{init_logging, init_metrics, LoggingConfig};
use permweave_server::{PermissionService, ServerConfig};
use permweave_storage::MemoryNodeStorage;

/// permweave - permission and meta resolution service
#[derive(Parser, Debug)]
#[command(name = "permweave")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match args.config {
        Some(path) => ServerConfig::load(&path)?,
        None => ServerConfig::from_env()?,
    };

    init_logging(LoggingConfig::from_settings(&config.logging));
    info!(version = env!("CARGO_PKG_VERSION"), server = %config.server.name, "starting permweave");

    if config.metrics.enabled {
        let _metrics = init_metrics()?;
        info!("metrics recorder installed");
    }

    // "memory" is the only backend validate() accepts.
    let storage = Arc::new(MemoryNodeStorage::new());
    let service = PermissionService::new(&config, storage)?;
    let groups = service.load_all_groups().await?;
    info!(groups, "ready");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let housekeeping = tokio::spawn(service.housekeeping().run(shutdown_rx));

    signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    if let Err(e) = housekeeping.await {
        warn!(error = %e, "housekeeping task ended abnormally");
    }
    Ok(())
}
