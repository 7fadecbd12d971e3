use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tracing::info;

use crate::generation::GenerationEngine;

use super::routes::create_router;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<GenerationEngine>,
}

pub async fn start_server(state: AppState, bind: SocketAddr, shutdown_rx: watch::Receiver<bool>) -> Result<()> {
    let app = create_router().with_state(state);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("Colloquy API server listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_rx))
        .await?;

    Ok(())
}

async fn shutdown_signal(mut shutdown_rx: watch::Receiver<bool>) {
    // Wait for shutdown signal
    while !*shutdown_rx.borrow() {
        if shutdown_rx.changed().await.is_err() {
            break;
        }
    }
    info!("Shutting down API server...");
}
