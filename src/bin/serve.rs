use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use zone_discipline::api::{AppState, build_router};
use zone_discipline::config::EngineConfig;
use zone_discipline::model_store::ModelStore;

#[tokio::main]
async fn main() -> Result<()> {
    zone_discipline::init_tracing();
    let config = EngineConfig::load();

    let models = ModelStore::new();
    match config.model_path.as_deref() {
        Some(path) if path.exists() => {
            if let Err(err) = models.load_from(path) {
                warn!(path = %path.display(), error = %format!("{err:#}"), "model artifact not loaded");
            }
        }
        Some(path) => info!(path = %path.display(), "no model artifact yet, serving without models"),
        None => warn!("no cache directory, serving without models"),
    }

    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(AppState::new(models, config));
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("bind {bind_addr}"))?;
    info!(addr = %bind_addr, "zone discipline api listening");
    axum::serve(listener, app).await.context("http server")?;
    Ok(())
}
