use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use colloquy_engine::api::{self, AppState};
use colloquy_engine::store::SqliteStore;
use colloquy_engine::{provider, Config, GenerationEngine};
use colloquy_shared::ToolRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("colloquy=info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    info!(provider = ?config.provider, model = %config.model, "Starting Colloquy");

    let store = Arc::new(SqliteStore::open(&config.db_path)?);
    let registry = Arc::new(ToolRegistry::with_defaults());
    let engine = GenerationEngine::new(provider::from_config(&config), registry, store)
        .with_max_turns(config.max_turns);
    let state = AppState {
        engine: Arc::new(engine),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let bind = config.bind;
    let api_handle = tokio::spawn(async move {
        if let Err(e) = api::start_server(state, bind, shutdown_rx).await {
            error!("API server crashed: {:#}", e);
        }
    });

    // Wait for Ctrl+C
    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    let _ = shutdown_tx.send(true);
    let _ = api_handle.await;

    info!("Colloquy shutdown complete");
    Ok(())
}
