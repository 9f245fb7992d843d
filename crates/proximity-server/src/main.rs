//! # proximity-server
//!
//! HTTP server for the proximity session aggregator.
//!
//! This binary provides:
//! - REST API for reading ingest and contact event lookup
//! - Periodic retention sweeps
//! - OpenAPI documentation via Swagger UI
//! - Structured logging to file and stdout
//!
//! ## Running
//!
//! ```bash
//! # Development
//! cargo run --package proximity-server
//!
//! # Production
//! PROXIMITY_ENV=production ./proximity-server
//! ```
//!
//! The configuration file is read from `PROXIMITY_CONFIG` when set, otherwise
//! from the platform default path.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use proximity_core::{default_config_path, ProximityConfig, RetentionSweeper};
use proximity_server::api::create_router;
use proximity_server::logging;
use proximity_server::state::AppState;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

/// Environment variable overriding the configuration file path.
const CONFIG_PATH_ENV: &str = "PROXIMITY_CONFIG";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _log_guard = logging::init(logging::LogMode::from_env())?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting proximity-server");

    // An explicitly named file must exist; the default one is optional.
    let (config_path, config) = match std::env::var_os(CONFIG_PATH_ENV) {
        Some(path) => {
            let path = PathBuf::from(path);
            let config = ProximityConfig::load_required(&path);
            (path, config)
        }
        None => {
            let path = default_config_path()?;
            let config = ProximityConfig::load(Some(&path));
            (path, config)
        }
    };
    let config = config
        .with_context(|| format!("loading configuration from {}", config_path.display()))?;
    info!(
        path = %config_path.display(),
        data_dir = %config.storage.resolved_data_dir().display(),
        merge_threshold_secs = config.aggregation.merge_threshold_secs,
        retention_days = config.retention.days,
        "Configuration loaded"
    );

    let bind_address = config.server.bind_address.clone();
    let (state, ingest_handle) = AppState::new(config);
    let state = Arc::new(state);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = RetentionSweeper::new(Arc::clone(&state.recorder), &state.config.retention)
        .spawn(shutdown_rx);

    let app = create_router(state);

    let listener = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("binding {bind_address}"))?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, draining background tasks");
    let _ = shutdown_tx.send(true);
    if let Err(err) = sweeper.await {
        warn!(error = %err, "Retention sweeper task failed");
    }
    // Completes once the router's state is gone and every queued reading is recorded.
    if let Err(err) = ingest_handle.await {
        warn!(error = %err, "Ingest dispatcher task failed");
    }

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C"),
        () = terminate => info!("Received SIGTERM"),
    }
}
