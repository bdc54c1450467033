//! Mapping Consumer Binary
//!
//! Consumes segmentation-complete messages from SQS and publishes the
//! resulting segment mappings to the catalog.
//! - Structured JSON logging
//! - Bounded concurrency per batch
//! - Graceful shutdown: in-flight messages finish, the rest are redelivered
//!
//! ## Configuration
//!
//! See `segment_mapping_publisher::config` for the full list. Required:
//! `SQS_QUEUE_URL`, `AWS_REGION`, `CATALOG_API_ENDPOINT`,
//! `CATALOG_LOGIN_EMAIL`, `CATALOG_LOGIN_PASSWORD`, `DATABASE_URL`.
//!
//! ## Usage
//!
//! ```bash
//! SQS_QUEUE_URL=... AWS_REGION=... DATABASE_URL=... cargo run --bin mapping_consumer --features sqs
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info};

use segment_mapping_publisher::store::postgres::PostgresConfig;
use segment_mapping_publisher::telemetry::{init_tracing, LogFormat};
use segment_mapping_publisher::{
    Consumer, HttpCatalogPublisher, JobStoreReader, MessageHandler, PostgresJobStore, Settings,
    SqsMessageSource, TracingMetrics,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing(LogFormat::from_env());

    let version = env!("CARGO_PKG_VERSION");
    info!(version = version, "Starting mapping consumer");

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return Err(e.into());
        }
    };
    info!(
        queue_url = %settings.queue.queue_url,
        region = %settings.queue.region,
        catalog_endpoint = %settings.catalog.endpoint,
        "Configuration loaded"
    );

    info!("Connecting to PostgreSQL...");
    let connect_start = Instant::now();
    let store = match tokio::time::timeout(
        Duration::from_secs(30),
        PostgresJobStore::new(PostgresConfig::from_env(settings.database_url.clone())),
    )
    .await
    {
        Ok(Ok(store)) => store,
        Ok(Err(e)) => {
            error!(error = %e, "Failed to connect to PostgreSQL");
            return Err(e.into());
        }
        Err(_) => {
            error!("PostgreSQL connection timeout after 30s");
            return Err("Database connection timeout".into());
        }
    };
    info!(
        latency_ms = connect_start.elapsed().as_millis() as u64,
        "PostgreSQL connection established"
    );
    if !store.is_healthy().await {
        error!("PostgreSQL health check failed");
        return Err("Database health check failed".into());
    }

    let source = SqsMessageSource::connect(&settings.queue).await;
    let publisher = HttpCatalogPublisher::new(settings.catalog)?;

    let handler = MessageHandler::new(
        JobStoreReader::new(Arc::new(store), settings.store_timeout),
        Arc::new(publisher),
        Arc::new(TracingMetrics),
    );
    let consumer = Consumer::new(
        Arc::new(source),
        Arc::new(handler),
        settings.queue.batch_size,
        settings.queue.concurrency,
    );

    let shutdown_signal = async {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("Failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown"),
            _ = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
        }
    };

    let stats = consumer.run_until(shutdown_signal).await;

    info!(
        received = stats.received,
        acked = stats.acked,
        retried = stats.retried,
        "Mapping consumer shutdown complete"
    );

    Ok(())
}
