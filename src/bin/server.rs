//! Cortex scheduler server.
//!
//! Long-running process hosting the extraction runtime and the external
//! scheduling HTTP surface.
//!
//! ```bash
//! cargo run --bin cortex-server -- /etc/cortex/config.yaml
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cortex::api::{create_router, AppState};
use cortex::config::Config;
use cortex::decisions::{DecisionController, PostgresDecisionRecorder};
use cortex::extractors::ExtractorRuntime;
use cortex::features::{FeatureStore, PostgresFeatureStore};
use cortex::monitor::Monitor;
use cortex::scheduling::SchedulingPipeline;
use cortex::triggers::{MqttTriggerBus, TriggerBus};

const EXTRACT_TIMEOUT: Duration = Duration::from_secs(120);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("CORTEX_CONFIG").ok())
        .unwrap_or_else(|| "config.yaml".to_string());
    let config = Config::load(&config_path)?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database.url())
        .await
        .context("failed to connect to the database")?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to apply migrations")?;
    info!(host = %config.database.host, "database ready");

    let store: Arc<dyn FeatureStore> = Arc::new(PostgresFeatureStore::new(pool.clone()));
    let monitor = Monitor::new()?;

    let bus: Arc<dyn TriggerBus> = MqttTriggerBus::connect(&config.mqtt.url)?;
    let runtime = ExtractorRuntime::new(
        &config.extractors,
        store.clone(),
        bus.clone(),
        monitor.clone(),
        EXTRACT_TIMEOUT,
    )
    .await?;
    runtime.subscribe_triggers().await?;

    let mut pipelines = HashMap::new();
    for pipeline_config in &config.pipelines {
        let pipeline =
            SchedulingPipeline::from_config(pipeline_config, store.clone(), monitor.clone())
                .await?;
        pipelines.insert(pipeline_config.name.clone(), Arc::new(pipeline));
    }
    info!(pipelines = pipelines.len(), extractors = config.extractors.len(), "configured");

    let recorder = Arc::new(PostgresDecisionRecorder::new(pool));
    let controller = Arc::new(DecisionController::new(
        pipelines,
        recorder.clone(),
        monitor.clone(),
        config.api.log_request_bodies,
    ));

    let state = Arc::new(AppState {
        controller,
        recorder,
        store,
        monitor,
        hypervisors: config.hypervisors.clone(),
        log_request_bodies: config.api.log_request_bodies,
    });
    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.api.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "listening");
    axum::serve(listener, app).await.context("server exited")?;
    Ok(())
}
