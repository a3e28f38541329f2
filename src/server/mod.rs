mod router;
mod state;

pub use router::build_router;
pub use state::ServeState;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;

use crate::service::SessionService;

/// Serve the admin/status surface until Ctrl+C, then drain the service.
pub async fn serve(service: Arc<SessionService>, bind: &str) -> Result<()> {
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid bind address {bind}"))?;
    let app = build_router(ServeState::new(service.clone()));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "admin server listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("admin server exited with error")?;

    service.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(?err, "failed to install Ctrl+C handler");
    }
    info!("shutdown signal received");
}
