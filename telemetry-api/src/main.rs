use std::sync::Arc;

use anyhow::Context;
use axum::{routing::get, Router};
use telemetry_api::config::{Config, StorageBackend};
use telemetry_api::db::{make_pool, PgReadingStore};
use telemetry_api::store::{MemoryReadingStore, ReadingStore};
use telemetry_api::{metrics, mqtt, rest, TelemetryService};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env().context("invalid configuration")?;

    info!("Starting telemetry API");
    info!("HTTP server: {}", config.http_addr);
    info!("Device population: 0..{}", config.device_count);

    metrics::init_metrics().context("failed to register metrics")?;

    let store: Arc<dyn ReadingStore> = match &config.storage {
        StorageBackend::Postgres { database_url } => {
            info!("Database: {}", database_url.split('@').last().unwrap_or("***"));
            let pool = make_pool(database_url)
                .await
                .context("failed to connect to database")?;
            Arc::new(PgReadingStore::new(pool))
        }
        StorageBackend::Memory => {
            info!("Using in-memory reading store");
            Arc::new(MemoryReadingStore::new())
        }
    };

    let service = TelemetryService::new(store, config.device_count)
        .with_limits(config.limits)
        .with_latest_deadline(config.latest_deadline);

    let mqtt_handle = match config.mqtt.clone() {
        Some(mqtt_config) => {
            info!("MQTT broker: {}:{}", mqtt_config.broker, mqtt_config.port);
            let mqtt_service = service.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = mqtt::run_mqtt(mqtt_config, mqtt_service).await {
                    error!("MQTT task failed: {}", e);
                }
            }))
        }
        None => None,
    };

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .merge(rest::create_router(service));

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.http_addr))?;

    info!("HTTP server listening on {}", config.http_addr);

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap_or_else(|e| {
            error!("HTTP server error: {}", e);
        });
    });

    let mqtt_finished = async {
        match mqtt_handle {
            Some(handle) => {
                let _ = handle.await;
            }
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = mqtt_finished => {
            error!("MQTT task terminated");
        }
        _ = server_handle => {
            error!("HTTP server terminated");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Shutting down");
    Ok(())
}

async fn metrics_handler() -> String {
    metrics::gather_metrics()
}
