//! Chunkdrop Server
//!
//! Accepts XOR-obfuscated uploads, optionally split into chunks, assembles
//! them on disk and serves them back through the same transform.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use chunkdrop_server::{app, AppState, Cli, Config};
use clap::Parser;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "chunkdrop_server=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from(Cli::parse());

    tracing::info!("Starting Chunkdrop Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Upload directory: {}", config.storage.upload_dir.display());
    tracing::info!("Chunk directory: {}", config.storage.chunk_dir.display());
    tracing::warn!("Transfers are XOR-obfuscated, not encrypted; use TLS for confidentiality");

    let addr = config.bind_addr();
    let state = AppState::new(config.clone())
        .await
        .context("Failed to initialize application state")?;

    if let Some(interval) = config.sweep_interval() {
        state
            .upload_service()
            .start_sweep_task(interval, config.session_idle());
        tracing::info!(
            interval_secs = interval.as_secs(),
            idle_secs = config.sessions.idle_secs,
            "Abandoned-session sweep spawned"
        );
    }

    let app = app(state);

    // Start server with graceful shutdown
    tracing::info!("Chunkdrop Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
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
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
