//! Chunk Relay Server
//!
//! Receives file chunks, assembles them on finish, and relays the file to
//! catbox or litterbox.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chunk_relay_server::config::Config;
use chunk_relay_server::relay::HttpRelay;
use chunk_relay_server::routes;
use chunk_relay_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "chunk_relay_server=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();

    let config = Config::from_env().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config from env: {}, using defaults", e);
        Config::default()
    });

    tracing::info!("Starting chunk relay server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Chunk storage: {}", config.storage.uploads_dir.display());
    tracing::info!("Artifact storage: {}", config.storage.temp_dir.display());

    for dir in [&config.storage.uploads_dir, &config.storage.temp_dir] {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    let relay = HttpRelay::new(&config.relay).context("Failed to build relay client")?;
    let app_state = AppState::with_local_storage(config.clone(), Arc::new(relay));

    // Start session reaper
    let reaper = match config.sessions.reaper_interval_secs {
        0 => None,
        secs => Some(
            app_state
                .uploads()
                .tracker()
                .clone()
                .start_cleanup_task(Duration::from_secs(secs)),
        ),
    };

    let app = routes::router(app_state);

    // Start server with graceful shutdown
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("Resumable upload server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    if let Some(reaper) = reaper {
        reaper.abort();
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
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
