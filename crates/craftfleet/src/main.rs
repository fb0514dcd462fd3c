//! craftfleet - Minecraft fleet manager
//!
//! Command-line entrypoint: loads the fleet configuration, wires the process
//! supervisor and RCON connector together, and serves the REST API.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use craftfleet_config::FleetConfig;
use craftfleet_manager::{FleetRegistry, LocalSupervisor, TcpRconConnector};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the fleet configuration file.
    #[arg(long, default_value = "fleet.yaml")]
    config: String,

    /// Listen address for the REST API, overriding the config file.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let mut config = if Path::new(&args.config).exists() {
        FleetConfig::from_file(&args.config)
            .with_context(|| format!("failed to load {}", args.config))?
    } else {
        warn!(path = %args.config, "config file not found, using defaults");
        FleetConfig::default()
    };
    if let Some(bind) = args.bind {
        config.bind = bind;
    }

    let supervisor = Arc::new(LocalSupervisor::new());
    let connector = Arc::new(TcpRconConnector::new(config.rcon.clone()));
    let fleet = Arc::new(FleetRegistry::new(&config, supervisor, connector));

    for server in &config.servers {
        fleet
            .adopt(server.clone())
            .with_context(|| format!("invalid server `{}` in {}", server.name, args.config))?;
    }
    if !config.servers.is_empty() {
        info!(count = config.servers.len(), "adopted configured servers");
    }

    let app = craftfleet_api::create_app(fleet);
    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    info!(addr = %config.bind, "craftfleet API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server error")?;

    info!("shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "failed to listen for shutdown signal");
        return;
    }
    info!("shutdown signal received");
}
