use anyhow::{Context, Result};
use audio_registry::config::{Config, RecordStoreBackend};
use audio_registry::dynamodb_store::DynamoDbRecordStore;
use audio_registry::memory::MemoryRecordStore;
use audio_registry::metadata_store::MetadataStore;
use audio_registry::s3_store::S3ObjectStore;
use audio_registry::{start_api_server, AppState, NotificationConsumer, RecordStore, Registry, UrlService};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        record_store = config.record_store.backend.as_str(),
        "Starting audio metadata registry"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize components
    let s3_store = Arc::new(
        S3ObjectStore::new(&config.s3)
            .await
            .context("Failed to initialize S3 object store")?,
    );

    let records = init_record_store(&config).await?;

    let registry = Arc::new(Registry::new(
        s3_store.clone(),
        records,
        &config.s3,
        &config.ingestion,
    ));

    let urls = UrlService::new(s3_store, &config.s3.bucket, config.presigned_url_expiry());

    let shutdown = CancellationToken::new();

    // Spawn notification consumer task if ingestion is configured
    let consumer_handle = match &config.kafka {
        Some(kafka_config) => {
            let consumer = NotificationConsumer::new(kafka_config, registry.clone())
                .context("Failed to initialize Kafka consumer")?;
            let token = shutdown.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = consumer.run(token).await {
                    error!(error = %e, "Kafka consumer error");
                }
            }))
        }
        None => {
            warn!("No Kafka configuration, storage notification ingestion disabled");
            None
        }
    };

    // Spawn API server task
    let api_state = AppState { registry, urls };
    let api_config = config.api.clone();
    let api_token = shutdown.clone();
    let api_handle = tokio::spawn(async move {
        let stopped = async move { api_token.cancelled().await };
        if let Err(e) = start_api_server(api_state, &api_config, stopped).await {
            error!(error = %e, "API server error");
        }
    });

    info!("Audio metadata registry started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down audio metadata registry");

    shutdown.cancel();

    if let Some(handle) = consumer_handle {
        if let Err(e) = handle.await {
            warn!(error = %e, "Kafka consumer task did not stop cleanly");
        }
    }
    if let Err(e) = api_handle.await {
        warn!(error = %e, "API server task did not stop cleanly");
    }

    info!("Audio metadata registry stopped");

    Ok(())
}

/// Build the configured record store backend
async fn init_record_store(config: &Config) -> Result<Arc<dyn RecordStore>> {
    match config.record_store.backend {
        RecordStoreBackend::Postgres => {
            let database = config
                .database
                .as_ref()
                .context("database configuration missing")?;

            let store = MetadataStore::new(database)
                .await
                .context("Failed to initialize metadata store")?;

            // Run migrations if enabled
            if database.run_migrations {
                store
                    .run_migrations()
                    .await
                    .context("Failed to run database migrations")?;
            }

            Ok(Arc::new(store))
        }
        RecordStoreBackend::Dynamodb => {
            let dynamodb = config
                .dynamodb
                .as_ref()
                .context("dynamodb configuration missing")?;

            let store = DynamoDbRecordStore::new(dynamodb, &config.s3.region)
                .await
                .context("Failed to initialize DynamoDB record store")?;

            Ok(Arc::new(store))
        }
        RecordStoreBackend::Memory => {
            warn!("Using in-memory record store, records are lost on restart");
            Ok(Arc::new(MemoryRecordStore::new()))
        }
    }
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
