//! Jukebox Server - standalone headless server for the classroom jukebox.
//!
//! Runs the reconciliation loop against the streaming provider and serves
//! the HTTP, SSE and WebSocket API to browser and display clients.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use jukebox_core::{
    bootstrap_services, create_http_client, start_server, InMemoryStore, JukeboxStore,
    LoggingEventEmitter, SpotifyClient, SqliteStore,
};
use tokio::signal;

use crate::config::ServerConfig;

/// Jukebox Server - shared classroom music queue.
#[derive(Parser, Debug)]
#[command(name = "jukebox-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "JUKEBOX_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long, env = "JUKEBOX_BIND_PORT")]
    port: Option<u16>,

    /// SQLite database path (overrides config file).
    #[arg(short = 'd', long, env = "JUKEBOX_DATABASE_PATH")]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Jukebox Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(port) = args.port {
        config.bind_port = port;
    }
    if let Some(database) = args.database {
        config.database_path = Some(database);
    }

    match config.database_path.clone() {
        Some(path) => {
            log::info!("Using database: {}", path.display());
            let store = SqliteStore::open(&path)
                .with_context(|| format!("Failed to open database: {}", path.display()))?;
            run(config, Arc::new(store)).await
        }
        None => {
            log::warn!("No database configured - queue metadata and bans will not persist");
            run(config, Arc::new(InMemoryStore::new())).await
        }
    }
}

/// Wires services around `store`, serves until a shutdown signal arrives.
async fn run<S>(config: ServerConfig, store: Arc<S>) -> Result<()>
where
    S: JukeboxStore + 'static,
{
    let credentials = config.spotify_credentials()?;
    let http = create_http_client().context("Failed to create HTTP client")?;
    let provider = Arc::new(SpotifyClient::new(http, credentials));

    let core_config = config.to_core_config();
    log::info!(
        "Configuration: bind_port={}, sync_interval_ms={}",
        core_config.preferred_port,
        core_config.sync_interval_ms
    );

    let services = bootstrap_services(core_config, provider, store)
        .context("Failed to bootstrap services")?;
    services
        .event_bridge
        .set_external_emitter(Arc::new(LoggingEventEmitter));

    log::info!("Services bootstrapped successfully");

    services.start_background_tasks();

    log::info!("Background tasks started");

    let app_state = services.app_state().context("Failed to build app state")?;
    let server_cancel = services.cancel_token.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(app_state, server_cancel).await {
            log::error!("Server error: {}", e);
        }
    });

    // Wait for shutdown signal
    shutdown_signal().await;

    log::info!("Shutdown signal received, cleaning up...");

    // Cancels the sync loop and stops the HTTP server accepting requests
    services.shutdown().await;

    if let Err(e) = server_handle.await {
        log::warn!("Server task ended abnormally: {}", e);
    }

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
