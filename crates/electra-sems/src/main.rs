//! electra-sems - Station Energy Management System server
//!
//! Loads the station configuration, builds the station controller and
//! serves the HTTP API until the process is stopped.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use sems_api::create_app;
use sems_core::GridPolicy;
use sems_engine::StationController;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::load_station_config;

/// Grid-level reconciliation strategy
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum GridPolicyArg {
    /// Scale every session by the same factor when the grid is oversubscribed
    Proportional,
    /// Water-fill the charger-level allocations against the grid capacity
    MaxMin,
}

impl From<GridPolicyArg> for GridPolicy {
    fn from(arg: GridPolicyArg) -> Self {
        match arg {
            GridPolicyArg::Proportional => GridPolicy::ProportionalScaling,
            GridPolicyArg::MaxMin => GridPolicy::MaxMinFair,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum LogFormat {
    Pretty,
    Json,
}

/// Command line arguments for the electra-sems server
#[derive(Parser, Debug)]
#[command(name = "electra-sems")]
#[command(about = "Electra Station Energy Management System", long_about = None)]
struct Args {
    /// Path to the station configuration JSON file (or set SEMS_CONFIG)
    #[arg(short, long, env = "SEMS_CONFIG")]
    config: PathBuf,

    /// Address to bind the server to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to bind the server to (or set SEMS_PORT)
    #[arg(short, long, default_value_t = 3000, env = "SEMS_PORT")]
    port: u16,

    /// Grid-level reconciliation strategy
    #[arg(long, value_enum, default_value_t = GridPolicyArg::Proportional)]
    grid_policy: GridPolicyArg,

    /// Log level, overridden by RUST_LOG
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
}

fn init_tracing(args: &Args) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match args.log_format {
        LogFormat::Pretty => subscriber.pretty().init(),
        LogFormat::Json => subscriber.json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_tracing(&args);

    let station_config = load_station_config(&args.config).await?;
    info!(
        config_path = %args.config.display(),
        station_id = %station_config.station_id,
        chargers = station_config.chargers.len(),
        grid_capacity_kw = station_config.grid_capacity,
        "Station configuration loaded"
    );

    let policy = GridPolicy::from(args.grid_policy);
    let controller = StationController::with_policy(station_config, policy)
        .context("Failed to initialise the station controller")?;

    let app = create_app(controller);

    let bind_addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;
    info!(address = %bind_addr, ?policy, "Starting server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for the shutdown signal");
        std::future::pending::<()>().await;
    }
}
