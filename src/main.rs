//! Scale bridge - serial scale to HTTP bridge
//!
//! Polls a serial-attached scale, forwards significant weight changes to a
//! remote API and serves the latest reading on a local HTTP interface.
//!
//! Module structure:
//! - `domain/` - Core types (WeightReading, DispatchPayload, LatestWeightCell)
//! - `io/` - External interfaces (serial, remote API, query server)
//! - `services/` - Poll loop, change filter, dispatch worker
//! - `infra/` - Config and stats

use clap::Parser;
use scale_bridge::domain::LatestWeightCell;
use scale_bridge::infra::{Config, Stats};
use scale_bridge::io::{HttpDispatcher, PortLocator, QueryServer, QueryState, SerialReader};
use scale_bridge::services::{create_dispatch_worker, Monitor};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Scale bridge - serial scale polling and weight forwarding
#[derive(Parser, Debug)]
#[command(name = "scale-bridge", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() {
    // Structured logging; RUST_LOG=debug shows raw serial frames
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    let args = Args::parse();
    let config_path = args.config.unwrap_or_else(Config::default_config_path);
    let config = Config::load_from_path(&config_path);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_hash = env!("GIT_HASH"),
        config_file = %config.config_file(),
        device = ?config.serial_device(),
        selection = ?config.port_selection(),
        prefix = %config.port_prefix(),
        baud = %config.baud(),
        poll_interval_ms = %config.poll_interval().as_millis(),
        threshold = %config.variation_threshold(),
        dispatch_url = %config.dispatch_url(),
        port = %config.server_port(),
        "scale_bridge_starting"
    );

    // Shared components
    let locator = Arc::new(PortLocator::new(&config));
    let latest = Arc::new(LatestWeightCell::new());
    let stats = Arc::new(Stats::new());

    // Query server bind is the only fatal startup failure
    let state = QueryState::new(config.app_name(), latest.clone(), locator.clone(), stats.clone());
    let server = match QueryServer::bind(config.bind_address(), config.server_port(), state).await {
        Ok(server) => server,
        Err(e) => {
            error!(
                bind_address = %config.bind_address(),
                port = %config.server_port(),
                error = %e,
                "query_server_bind_failed"
            );
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Dispatch worker; ends once the monitor drops its sender
    let sink = Arc::new(HttpDispatcher::new(&config));
    let (dispatch_tx, worker) =
        create_dispatch_worker(sink, stats.clone(), config.dispatch_queue_size());
    let worker_handle = tokio::spawn(worker.run());

    let reader = SerialReader::new(&config, locator);
    let monitor = Monitor::new(&config, reader, latest, dispatch_tx, stats.clone());
    let monitor_handle = tokio::spawn(monitor.run(shutdown_rx.clone()));

    let server_handle = tokio::spawn(server.run(shutdown_rx));

    // Handle shutdown on Ctrl+C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    let _ = tokio::join!(monitor_handle, server_handle);
    let _ = worker_handle.await;

    stats.snapshot().log();
    info!("scale-bridge shutdown complete");
}
