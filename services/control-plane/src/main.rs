//! berth control plane
//!
//! Serves the HTTP API that deploys apps through the configured scheduler
//! backend and streams deployment status back to clients.

use std::time::Duration;

use anyhow::Result;
use berth_control_plane::{api, config, state::AppState};
use tokio::sync::watch;
use tokio::task::JoinError;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to BERTH_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting berth control plane");
    info!(
        listen_addr = %config.listen_addr,
        scheduler = ?config.scheduler,
        runner = ?config.runner,
        allowed_origins = config.allowed_origins.len(),
        submit_timeout_secs = config.submit_timeout.as_secs(),
        "Configuration loaded"
    );

    let state = AppState::from_config(&config);
    let app = api::create_router(state, &config.allowed_origins);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    let mut server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = &mut server_handle => {
            log_server_exit(result);
            return Ok(());
        }
    }

    // Let in-flight requests, including open deploy streams, finish
    let _ = shutdown_tx.send(true);
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, server_handle).await {
        Ok(result) => log_server_exit(result),
        Err(_) => warn!("HTTP server did not shut down in time"),
    }

    info!("Control plane shutdown complete");
    Ok(())
}

fn log_server_exit(result: Result<std::io::Result<()>, JoinError>) {
    match result {
        Ok(Ok(())) => info!("Server exited normally"),
        Ok(Err(e)) => error!(error = %e, "Server error"),
        Err(e) => error!(error = %e, "Server task panicked"),
    }
}
