pub mod api;
pub mod config;
pub mod dataset;
pub mod dataset_store;
pub mod discipline;
pub mod error;
pub mod events;
pub mod features;
pub mod glm;
pub mod http_cache;
pub mod http_client;
pub mod model_store;
pub mod modeler;
pub mod prediction;
pub mod referee;
pub mod standardize;
pub mod statsbomb;
pub mod synthetic;
pub mod zones;

/// Installs the `tracing` subscriber used by every binary: `RUST_LOG`
/// filtering with an `info` default.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
