//! relaycast-server — standalone headless server for relaycast.
//!
//! Ingests a remote audio source, fans it out live to HTTP clients, tees
//! captures to disk, and runs the transcribe-summarize-publish pipeline
//! over each one, all driven through a persistent, auto-advancing queue.

mod config;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use relaycast_core::{bootstrap, start_server, AppState};
use tokio::signal;

use crate::config::ServerConfig;

/// relaycast-server CLI.
#[derive(Parser, Debug)]
#[command(name = "relaycast-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "RELAYCAST_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file); 0 auto-discovers a free port.
    #[arg(short = 'p', long, env = "RELAYCAST_BIND_PORT")]
    port: Option<u16>,

    /// SQLite database path (overrides config file).
    #[arg(long, env = "RELAYCAST_DB_PATH")]
    db_path: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("relaycast-server v{}", env!("CARGO_PKG_VERSION"));

    let mut config =
        ServerConfig::load(args.config.as_deref()).context("failed to load configuration")?;

    if let Some(port) = args.port {
        config.bind_port = port;
    }
    if let Some(db_path) = args.db_path {
        config.db_path = db_path;
    }

    log::info!(
        "configuration: bind_port={}, db_path={}",
        config.bind_port,
        config.db_path
    );

    let services = bootstrap(config.to_bootstrap_config())
        .await
        .context("failed to bootstrap services")?;

    log::info!("services bootstrapped successfully");

    let app_state = AppState::from_services(services, config.bind_port);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(app_state).await {
            log::error!("server error: {e}");
        }
    });

    log::info!("http server started");

    shutdown_signal().await;

    log::info!("shutdown signal received, cleaning up...");

    server_handle.abort();

    log::info!("shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install ctrl+c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install sigterm handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
