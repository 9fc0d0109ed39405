use crate::config::DatabaseConfig;
use crate::metadata::MetadataRecord;
use crate::record_store::{CreateOutcome, RecordStore};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Row of the `audio_metadata` table
#[derive(Debug, Clone, FromRow)]
struct MetadataRow {
    filename: String,
    author: String,
    label: String,
    #[sqlx(rename = "type")]
    kind: String,
    words: String,
}

impl From<MetadataRow> for MetadataRecord {
    fn from(row: MetadataRow) -> Self {
        Self {
            filename: row.filename,
            author: row.author,
            label: row.label,
            kind: row.kind,
            words: row.words,
        }
    }
}

/// Metadata record store in PostgreSQL
pub struct MetadataStore {
    pool: PgPool,
}

impl MetadataStore {
    /// Create a new metadata store with connection pool
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MetadataStore {
    #[instrument(skip(self))]
    async fn get(&self, filename: &str) -> Result<Option<MetadataRecord>> {
        let row = sqlx::query_as::<_, MetadataRow>(
            r#"
            SELECT filename, author, label, "type", words
            FROM audio_metadata
            WHERE filename = $1
            "#,
        )
        .bind(filename)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query metadata record")?;

        Ok(row.map(Into::into))
    }

    #[instrument(skip(self, record), fields(filename = %record.filename))]
    async fn put(&self, record: &MetadataRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audio_metadata (filename, author, label, "type", words, created_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (filename) DO UPDATE SET
                author = EXCLUDED.author,
                label = EXCLUDED.label,
                "type" = EXCLUDED."type",
                words = EXCLUDED.words,
                created_at = EXCLUDED.created_at
            "#,
        )
        .bind(&record.filename)
        .bind(&record.author)
        .bind(&record.label)
        .bind(&record.kind)
        .bind(&record.words)
        .execute(&self.pool)
        .await
        .context("Failed to upsert metadata record")?;

        debug!(filename = %record.filename, "Metadata record written");
        Ok(())
    }

    #[instrument(skip(self, record), fields(filename = %record.filename))]
    async fn create(&self, record: &MetadataRecord) -> Result<CreateOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO audio_metadata (filename, author, label, "type", words, created_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (filename) DO NOTHING
            "#,
        )
        .bind(&record.filename)
        .bind(&record.author)
        .bind(&record.label)
        .bind(&record.kind)
        .bind(&record.words)
        .execute(&self.pool)
        .await
        .context("Failed to insert metadata record")?;

        if result.rows_affected() == 0 {
            debug!(filename = %record.filename, "Metadata record already present");
            return Ok(CreateOutcome::AlreadyExists);
        }

        debug!(filename = %record.filename, "Metadata record created");
        Ok(CreateOutcome::Created)
    }

    #[instrument(skip(self))]
    async fn scan(&self) -> Result<Vec<MetadataRecord>> {
        let rows = sqlx::query_as::<_, MetadataRow>(
            r#"
            SELECT filename, author, label, "type", words
            FROM audio_metadata
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to scan metadata records")?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("PostgreSQL unreachable")?;
        Ok(())
    }
}
