//! ClauseLens — contract intelligence server with hybrid retrieval.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

mod processing;
mod routes;
mod state;

use state::AppState;

fn resolve_data_dir() -> PathBuf {
    std::env::var("CLAUSELENS_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let data_dir = resolve_data_dir();
    info!("Data directory: {}", data_dir.display());

    let config = clauselens_core::AppConfig::from_env(&data_dir)?;
    let port = config.port;

    let store = clauselens_store::SqliteStore::open(&config.data_paths.db, config.embedding_dim)
        .map_err(|e| anyhow::anyhow!("Failed to open store: {}", e))?;

    let state = Arc::new(AppState::new(config, store));

    // Background worker that extracts, chunks, and embeds uploads
    processing::start_processing_worker(state.clone());

    let app = routes::build_router(state.clone());

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("ClauseLens server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
