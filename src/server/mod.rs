//! HTTP API Server
//!
//! Axum-based server exposing generation, cancellation and model lifecycle
//! endpoints over a shared [`Generator`].

use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};

use crate::generate::Generator;

pub mod handlers;
pub mod routes;
pub mod state;

/// Serve until Ctrl-C / SIGTERM, then shut the model manager down.
pub async fn serve(generator: Arc<Generator>, addr: SocketAddr) -> Result<()> {
    let app = routes::create_router(state::AppState::new(Arc::clone(&generator)));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Cannot bind {}", addr))?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    let models = Arc::clone(generator.models());
    tokio::task::spawn_blocking(move || models.shutdown())
        .await
        .context("Model manager shutdown panicked")?;
    tracing::info!("server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl-C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
