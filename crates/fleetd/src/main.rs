//! fleetd: the FleetGrid daemon.
//!
//! Single binary that assembles the fleet described by a TOML file:
//! - State store (redb)
//! - Unit pools backed by local processes
//! - Unit supervisors (lifecycle, health probes)
//! - Fleet registry (directory, reconciliation)
//!
//! # Usage
//!
//! ```text
//! fleetd run --config /etc/fleetgrid/fleet.toml
//! fleetd units --config /etc/fleetgrid/fleet.toml
//! ```

mod config;
mod fleet;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use fleetgrid_registry::{FleetRegistry, PoolMap};
use fleetgrid_state::{AlarmDriver, StateStore};

use crate::config::FleetConfig;
use crate::fleet::Fleet;

#[derive(Parser)]
#[command(name = "fleetd", about = "FleetGrid daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the fleet until interrupted.
    Run {
        /// Fleet configuration file.
        #[arg(long, default_value = "/etc/fleetgrid/fleet.toml")]
        config: PathBuf,
    },
    /// Print the persisted unit directory as JSON.
    Units {
        /// Fleet configuration file.
        #[arg(long, default_value = "/etc/fleetgrid/fleet.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,fleetd=debug,fleetgrid=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run { config } => run(config).await,
        Command::Units { config } => list_units(config),
    }
}

async fn run(config_path: PathBuf) -> anyhow::Result<()> {
    info!(config = ?config_path, "FleetGrid daemon starting");
    let config = FleetConfig::from_file(&config_path)?;

    let fleet = Arc::new(Fleet::assemble(&config)?);
    fleet.bring_up(&config.units).await?;

    // ── Alarm loop ─────────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = fleet.clone();
    let alarm_handle = tokio::spawn(async move {
        runner.run(shutdown_rx).await;
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    let _ = alarm_handle.await;

    info!("FleetGrid daemon stopped");
    Ok(())
}

fn list_units(config_path: PathBuf) -> anyhow::Result<()> {
    let config = FleetConfig::from_file(&config_path)?;
    let store = StateStore::open(&config.store.path)?;

    let registry = FleetRegistry::new(PoolMap::new(), &store, AlarmDriver::new(store.clone()));
    let units = registry.list_units()?;
    println!("{}", serde_json::to_string_pretty(&units)?);
    Ok(())
}
