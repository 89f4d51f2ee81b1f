//! # Dulce Bias Storefront Daemon
//!
//! Opens the shop database, sweeps stock alerts once and then delivers
//! queued notifications until stopped.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  storefront.toml ──► StorefrontConfig ──► Storefront::open (migrate)   │
//! │                                                 │                       │
//! │                                                 ▼                       │
//! │                                        stock alert sweep               │
//! │                                                 │                       │
//! │                                                 ▼                       │
//! │                     QueueWorker::run ◄── Ctrl+C / SIGTERM → shutdown    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The config path is the first argument, else `DULCE_CONFIG`, else the
//! platform config directory.

use std::path::PathBuf;

use tracing::{error, info, warn};

use dulce_storefront::{init_tracing, Senders, Storefront, StorefrontConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    info!("Starting Dulce Bias storefront...");

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("DULCE_CONFIG").ok())
        .map(PathBuf::from);
    let config = StorefrontConfig::load(config_path)?;
    info!(
        database = %config.database.path.display(),
        oversell_policy = ?config.stock.oversell_policy,
        "Configuration loaded"
    );

    let storefront = Storefront::open(config).await?;

    match storefront.stock_alert_sweep().await {
        Ok(queued) => info!(queued, "Startup stock alerts queued"),
        Err(e) => warn!(?e, "Startup stock alert sweep failed"),
    }

    let senders = Senders::simulated(&storefront.config().notifications.from_email);
    let (worker, handle) = storefront.queue_worker(senders);
    let worker_task = tokio::spawn(worker.run());

    shutdown_signal().await;

    if let Err(e) = handle.shutdown().await {
        error!(?e, "Failed to signal notification worker");
    }
    worker_task.await?;

    storefront.db().close().await;
    info!("Storefront shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(?e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(?e, "Failed to install SIGTERM handler");
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

    info!("Shutdown signal received, stopping notification worker...");
}
