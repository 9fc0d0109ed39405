//! Registration of audio metadata.
//!
//! Two entry points write records:
//!
//! - [`Registry::create_from_submission`]: a client submits metadata for an
//!   object it already uploaded. The record is validated, the object must
//!   exist, and no record may already be registered under the filename.
//! - [`Registry::ingest_from_storage_event`]: a storage notification names a
//!   freshly written object; its attached metadata is read back, checked for
//!   presence and written unconditionally.
//!
//! Neither path retries. Dependency faults surface to the caller, whose
//! infrastructure owns retry and backoff.

use crate::config::{IngestionConfig, S3Config};
use crate::error::RegistryError;
use crate::metadata::{MetadataField, MetadataRecord};
use crate::notification::ObjectNotification;
use crate::object_store::{ObjectProbe, ObjectStore};
use crate::record_store::{CreateOutcome, RecordStore};
use crate::validation::{self, Rule, ValidationError, INGEST_REQUIRED_FIELDS};
use anyhow::{anyhow, Context};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Per-notification results of one ingested batch
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Keys registered successfully
    pub succeeded: Vec<String>,
    /// Keys that failed, each with its own error
    pub failed: Vec<IngestFailure>,
}

#[derive(Debug)]
pub struct IngestFailure {
    pub bucket: String,
    pub key: String,
    pub error: RegistryError,
}

impl BatchReport {
    /// True when every notification in the batch was registered
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Guards writes of metadata records against duplicates and orphans
pub struct Registry {
    objects: Arc<dyn ObjectStore>,
    records: Arc<dyn RecordStore>,
    bucket: String,
    ingest_concurrency: usize,
    ingest_timeout: Duration,
    ingest_required: Vec<MetadataField>,
}

impl Registry {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        records: Arc<dyn RecordStore>,
        s3: &S3Config,
        ingestion: &IngestionConfig,
    ) -> Self {
        let ingest_required = if ingestion.enforce_type {
            MetadataField::ALL.to_vec()
        } else {
            INGEST_REQUIRED_FIELDS.to_vec()
        };

        Self {
            objects,
            records,
            bucket: s3.bucket.clone(),
            ingest_concurrency: ingestion.concurrency.max(1),
            ingest_timeout: Duration::from_secs(ingestion.timeout_secs),
            ingest_required,
        }
    }

    /// The one bucket this registry serves, for submissions and notifications
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Register a client-submitted record.
    ///
    /// Checks run in a fixed order and stop at the first failure: validation,
    /// object existence, record existence, then a conditional create. A missing
    /// object is reported ahead of a duplicate record.
    #[instrument(skip(self, submission), fields(filename = %submission.filename))]
    pub async fn create_from_submission(
        &self,
        submission: &MetadataRecord,
    ) -> Result<(), RegistryError> {
        let result = self.guarded_create(submission).await;

        match &result {
            Ok(()) => {
                info!(filename = %submission.filename, "Metadata registered");
                metrics::counter!("registry.records.created").increment(1);
            }
            Err(e) => self.observe_failure(&submission.filename, e),
        }

        result
    }

    async fn guarded_create(&self, submission: &MetadataRecord) -> Result<(), RegistryError> {
        validation::validate(submission).map_err(RegistryError::ValidationFailed)?;

        let filename = submission.filename.as_str();

        let probe = self
            .objects
            .probe(&self.bucket, filename)
            .await
            .with_context(|| format!("Failed to probe object {}/{}", self.bucket, filename))?;

        if let ObjectProbe::NotFound = probe {
            return Err(RegistryError::ReferencedObjectMissing {
                filename: filename.to_string(),
            });
        }

        let existing = self
            .records
            .get(filename)
            .await
            .with_context(|| format!("Failed to look up record {}", filename))?;

        if existing.is_some() {
            return Err(RegistryError::DuplicateRecord {
                filename: filename.to_string(),
            });
        }

        // A concurrent registration can land between the lookup and this write;
        // the conditional create is what decides the conflict.
        match self
            .records
            .create(submission)
            .await
            .with_context(|| format!("Failed to write record {}", filename))?
        {
            CreateOutcome::Created => Ok(()),
            CreateOutcome::AlreadyExists => {
                debug!(filename = %filename, "Lost registration race");
                Err(RegistryError::DuplicateRecord {
                    filename: filename.to_string(),
                })
            }
        }
    }

    /// Register the metadata attached to a newly stored object.
    ///
    /// The object is probed again since it may have been deleted after the
    /// notification was sent. The write replaces any existing record.
    #[instrument(skip(self, notification), fields(bucket = %notification.bucket, key = %notification.key))]
    pub async fn ingest_from_storage_event(
        &self,
        notification: &ObjectNotification,
    ) -> Result<MetadataRecord, RegistryError> {
        let result = self.ingest(notification).await;

        match &result {
            Ok(record) => {
                info!(filename = %record.filename, "Metadata ingested from storage event");
                metrics::counter!("registry.records.ingested").increment(1);
            }
            Err(e) => {
                self.observe_failure(&notification.key, e);
                metrics::counter!("registry.ingest.failed").increment(1);
            }
        }

        result
    }

    async fn ingest(&self, notification: &ObjectNotification) -> Result<MetadataRecord, RegistryError> {
        let bucket = notification.bucket.as_str();
        let key = notification.key.as_str();

        let attributes = match self
            .objects
            .probe(bucket, key)
            .await
            .with_context(|| format!("Failed to probe object {}/{}", bucket, key))?
        {
            ObjectProbe::Found { metadata } => metadata,
            ObjectProbe::NotFound => {
                return Err(RegistryError::ReferencedObjectMissing {
                    filename: key.to_string(),
                })
            }
        };

        let record = MetadataRecord::from_attributes(&attributes);

        let mut violations = validation::check_required(&record, &self.ingest_required);
        if violations.is_empty() && record.filename != key {
            violations.push(ValidationError {
                field: MetadataField::Filename,
                rule: Rule::MatchesObjectKey,
                value: record.filename.clone(),
            });
        }
        if !violations.is_empty() {
            return Err(RegistryError::ValidationFailed(violations));
        }

        if record.kind.is_empty() {
            warn!(key = %key, "Ingesting object without a type attribute");
        }

        self.records
            .put(&record)
            .await
            .with_context(|| format!("Failed to write record {}", record.filename))?;

        Ok(record)
    }

    /// Ingest every notification of a batch independently.
    ///
    /// Each notification runs under its own deadline; one failing or timing
    /// out leaves the others untouched.
    pub async fn ingest_batch(&self, notifications: &[ObjectNotification]) -> BatchReport {
        let timeout = self.ingest_timeout;

        let outcomes: Vec<_> = stream::iter(notifications)
            .map(|notification| async move {
                let outcome =
                    match tokio::time::timeout(timeout, self.ingest_from_storage_event(notification))
                        .await
                    {
                        Ok(outcome) => outcome,
                        Err(_) => {
                            warn!(key = %notification.key, timeout = ?timeout, "Ingestion deadline expired");
                            Err(RegistryError::Dependency(anyhow!(
                                "ingestion of {}/{} exceeded {:?}",
                                notification.bucket,
                                notification.key,
                                timeout
                            )))
                        }
                    };
                (notification, outcome)
            })
            .boxed()
            .buffer_unordered(self.ingest_concurrency)
            .collect()
            .await;

        let mut report = BatchReport::default();
        for (notification, outcome) in outcomes {
            match outcome {
                Ok(_) => report.succeeded.push(notification.key.clone()),
                Err(error) => report.failed.push(IngestFailure {
                    bucket: notification.bucket.clone(),
                    key: notification.key.clone(),
                    error,
                }),
            }
        }

        report
    }

    /// All registered records, in no particular order
    #[instrument(skip(self))]
    pub async fn list(&self) -> Result<Vec<MetadataRecord>, RegistryError> {
        self.records.scan().await.context("Failed to scan records").map_err(|e| {
            error!(error = ?e, "Failed to list metadata");
            metrics::counter!("registry.dependency.errors").increment(1);
            RegistryError::Dependency(e)
        })
    }

    /// Whether the record store is reachable
    pub async fn check_ready(&self) -> anyhow::Result<()> {
        self.records.ping().await
    }

    fn observe_failure(&self, filename: &str, err: &RegistryError) {
        if err.is_client_error() {
            info!(filename = %filename, code = err.code(), reason = %err, "Registration rejected");
        } else {
            error!(filename = %filename, error = %err, "Registration failed");
            metrics::counter!("registry.dependency.errors").increment(1);
        }
        metrics::counter!("registry.records.rejected", "reason" => err.reason()).increment(1);
    }
}
