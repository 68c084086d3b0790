use ctscan_triage::{config, model, server, storage::FileStore};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const CONFIG_ENV: &str = "CTSCAN_CONFIG";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Init
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let metrics = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "prometheus recorder not installed");
            None
        }
    };

    model::loader::init_ort()?;

    // 2. Load Config
    let config_path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| "config.yaml".to_string());
    let config = config::AppConfig::load(&config_path)?;
    info!(path = %config_path, models = config.models.len(), "configuration loaded");

    let store = FileStore::new(
        &config.storage.upload_dir,
        &config.storage.results_dir,
        Duration::from_secs(config.storage.retention_hours * 3600),
    );
    store.ensure_dirs()?;

    // 3. Initialize Models
    let registry = model::registry::ModelRegistry::new();
    model::loader::load_all(&config.models, &registry);
    if registry.is_ready() {
        info!("both pipeline stages loaded");
    } else {
        warn!("pipeline stages missing, analysis requests will be rejected");
    }

    // 4. Create Router
    let state = server::types::AppState {
        registry,
        models: config.models,
        store,
        max_upload_bytes: config.server.max_upload_bytes,
        metrics,
    };
    let app = server::routes::create_router(state);

    // 5. Bind & Serve
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
