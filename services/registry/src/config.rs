use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while checking a loaded configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Main configuration for the registry service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// S3 configuration (audio objects and presigned URLs)
    pub s3: S3Config,
    /// Record store backend selection
    #[serde(default)]
    pub record_store: RecordStoreConfig,
    /// Postgres configuration (backend = "postgres")
    pub database: Option<DatabaseConfig>,
    /// DynamoDB configuration (backend = "dynamodb")
    pub dynamodb: Option<DynamoDbConfig>,
    /// Kafka configuration for storage notifications; ingestion is off without it
    pub kafka: Option<KafkaConfig>,
    /// Ingestion configuration
    #[serde(default)]
    pub ingestion: IngestionConfig,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// S3 bucket holding the audio files
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Presigned URL expiration in seconds
    #[serde(default = "default_presigned_url_expiry_secs")]
    pub presigned_url_expiry_secs: u64,
}

/// Which record store holds the metadata records
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecordStoreBackend {
    #[default]
    Postgres,
    Dynamodb,
    /// Process-local store, lost on restart
    Memory,
}

impl RecordStoreBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStoreBackend::Postgres => "postgres",
            RecordStoreBackend::Dynamodb => "dynamodb",
            RecordStoreBackend::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RecordStoreConfig {
    #[serde(default)]
    pub backend: RecordStoreBackend,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// DynamoDB record store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DynamoDbConfig {
    /// Table keyed by `filename`
    pub table_name: String,
    /// AWS region (falls back to the S3 region)
    pub region: Option<String>,
    /// Optional endpoint override (e.g. LocalStack)
    pub endpoint_url: Option<String>,
}

/// Kafka consumer configuration for storage notifications
#[derive(Debug, Clone, Deserialize)]
pub struct KafkaConfig {
    /// Kafka bootstrap servers
    pub bootstrap_servers: String,
    /// Consumer group ID
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,
    /// Topic receiving S3 event notifications
    #[serde(default = "default_notifications_topic")]
    pub notifications_topic: String,
    /// Enable SSL
    #[serde(default)]
    pub ssl_enabled: bool,
    /// SSL CA certificate path
    pub ssl_ca_location: Option<String>,
    /// SASL username
    pub sasl_username: Option<String>,
    /// SASL password
    pub sasl_password: Option<String>,
    /// Auto offset reset policy
    #[serde(default = "default_auto_offset_reset")]
    pub auto_offset_reset: String,
    /// Session timeout in milliseconds
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u32,
    /// Max poll interval in milliseconds
    #[serde(default = "default_max_poll_interval_ms")]
    pub max_poll_interval_ms: u32,
    /// Pause before a partially failed message is redelivered
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

/// Asynchronous ingestion configuration
#[derive(Debug, Clone, Deserialize)]
pub struct IngestionConfig {
    /// Records of one notification processed concurrently
    #[serde(default = "default_ingest_concurrency")]
    pub concurrency: usize,
    /// Deadline for a single record, in seconds
    #[serde(default = "default_ingest_timeout_secs")]
    pub timeout_secs: u64,
    /// Also require the `type` attribute on ingested objects
    #[serde(default)]
    pub enforce_type: bool,
}

/// API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Per-request deadline in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

// Default value functions
fn default_service_name() -> String {
    "audio-registry".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_presigned_url_expiry_secs() -> u64 {
    3600
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_consumer_group() -> String {
    "audio-registry".to_string()
}

fn default_notifications_topic() -> String {
    "audio.storage.notifications".to_string()
}

fn default_auto_offset_reset() -> String {
    "earliest".to_string()
}

fn default_session_timeout_ms() -> u32 {
    30000
}

fn default_max_poll_interval_ms() -> u32 {
    300000
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

fn default_ingest_concurrency() -> usize {
    8
}

fn default_ingest_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .set_default("service.name", "audio-registry")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            .add_source(config::File::with_name("config/registry").required(false))
            .add_source(config::File::with_name("/etc/audio-registry/registry").required(false))
            // REGISTRY__S3__BUCKET -> s3.bucket
            .add_source(
                config::Environment::with_prefix("REGISTRY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-section requirements serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.s3.bucket.trim().is_empty() {
            return Err(ConfigError::MissingRequired("s3.bucket".to_string()));
        }

        match self.record_store.backend {
            RecordStoreBackend::Postgres => match &self.database {
                None => {
                    return Err(ConfigError::MissingRequired(
                        "database (required for postgres backend)".to_string(),
                    ))
                }
                Some(db) if db.url.is_empty() => {
                    return Err(ConfigError::MissingRequired("database.url".to_string()))
                }
                Some(_) => {}
            },
            RecordStoreBackend::Dynamodb => match &self.dynamodb {
                None => {
                    return Err(ConfigError::MissingRequired(
                        "dynamodb (required for dynamodb backend)".to_string(),
                    ))
                }
                Some(ddb) if ddb.table_name.trim().is_empty() => {
                    return Err(ConfigError::MissingRequired(
                        "dynamodb.table_name".to_string(),
                    ))
                }
                Some(_) => {}
            },
            RecordStoreBackend::Memory => {}
        }

        if self.ingestion.concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                key: "ingestion.concurrency".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if self.ingestion.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "ingestion.timeout_secs".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if self.api.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "api.request_timeout_secs".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if let Some(kafka) = &self.kafka {
            if kafka.bootstrap_servers.is_empty() {
                return Err(ConfigError::MissingRequired(
                    "kafka.bootstrap_servers".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Get presigned URL expiry as Duration
    pub fn presigned_url_expiry(&self) -> Duration {
        Duration::from_secs(self.s3.presigned_url_expiry_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            concurrency: default_ingest_concurrency(),
            timeout_secs: default_ingest_timeout_secs(),
            enforce_type: false,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: true,
            cors_origins: Vec::new(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}
