//! Presigned URL issuance for direct audio upload and download.
//!
//! Signing itself is delegated to the object store's client. Upload URLs carry
//! the submitted metadata as attached object metadata, which is what the
//! ingestion path reads back once the upload lands.

use crate::error::RegistryError;
use crate::metadata::{MetadataField, MetadataRecord};
use crate::validation::{self, Rule, ValidationError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// A time-limited URL allowing one direct operation on an object
#[derive(Debug, Clone, Serialize)]
pub struct PresignedUrl {
    pub url: String,
    /// HTTP method the URL is signed for
    pub method: String,
    pub expires_at: DateTime<Utc>,
}

/// Signing primitive of the object store
#[async_trait]
pub trait UrlIssuer: Send + Sync {
    /// Sign a PUT of `key`, binding `attributes` as the object's user metadata
    async fn presign_put(
        &self,
        bucket: &str,
        key: &str,
        attributes: &HashMap<String, String>,
        expiry: Duration,
    ) -> Result<PresignedUrl>;

    /// Sign a GET of `key`
    async fn presign_get(&self, bucket: &str, key: &str, expiry: Duration) -> Result<PresignedUrl>;
}

/// Absolute expiry for a URL signed now
pub fn expires_at(expiry: Duration) -> Result<DateTime<Utc>> {
    let expiry = chrono::Duration::from_std(expiry).context("Presigned URL expiry out of range")?;
    Ok(Utc::now() + expiry)
}

/// Issues upload and download URLs against the configured bucket
#[derive(Clone)]
pub struct UrlService {
    issuer: Arc<dyn UrlIssuer>,
    bucket: String,
    expiry: Duration,
}

impl UrlService {
    pub fn new(issuer: Arc<dyn UrlIssuer>, bucket: impl Into<String>, expiry: Duration) -> Self {
        Self {
            issuer,
            bucket: bucket.into(),
            expiry,
        }
    }

    /// Upload URL for a submission.
    ///
    /// The submission must pass the full validator and fit in S3 user metadata,
    /// otherwise the signed upload would be refused by the store.
    pub async fn upload_url(&self, submission: &MetadataRecord) -> Result<PresignedUrl, RegistryError> {
        validation::validate(submission).map_err(RegistryError::ValidationFailed)?;
        validation::validate_attachable(submission).map_err(RegistryError::ValidationFailed)?;

        let url = self
            .issuer
            .presign_put(
                &self.bucket,
                &submission.filename,
                &submission.to_attributes(),
                self.expiry,
            )
            .await
            .map_err(|e| {
                error!(error = ?e, filename = %submission.filename, "Failed to presign upload URL");
                RegistryError::Dependency(e)
            })?;

        debug!(filename = %submission.filename, "Issued upload URL");
        Ok(url)
    }

    /// Download URL for an object key
    pub async fn download_url(&self, filename: &str) -> Result<PresignedUrl, RegistryError> {
        if filename.is_empty() {
            return Err(RegistryError::ValidationFailed(vec![ValidationError {
                field: MetadataField::Filename,
                rule: Rule::Required,
                value: String::new(),
            }]));
        }

        let url = self
            .issuer
            .presign_get(&self.bucket, filename, self.expiry)
            .await
            .map_err(|e| {
                error!(error = ?e, filename = %filename, "Failed to presign download URL");
                RegistryError::Dependency(e)
            })?;

        debug!(filename = %filename, "Issued download URL");
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryUrlIssuer;

    fn service(issuer: Arc<MemoryUrlIssuer>) -> UrlService {
        UrlService::new(issuer, "audio", Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_upload_url_binds_metadata() {
        let issuer = Arc::new(MemoryUrlIssuer::new());
        let submission = MetadataRecord::new("a.mp3", "x", "y", "z", "w");

        let url = service(issuer.clone()).upload_url(&submission).await.unwrap();

        assert_eq!(url.method, "PUT");
        assert!(url.url.contains("a.mp3"));
        assert!(url.expires_at > Utc::now());
        assert_eq!(issuer.signed_attributes("a.mp3"), Some(submission.to_attributes()));
    }

    #[tokio::test]
    async fn test_upload_url_rejects_incomplete_submission() {
        let issuer = Arc::new(MemoryUrlIssuer::new());
        let submission = MetadataRecord::new("a.mp3", "x", "", "z", "w");

        let err = service(issuer.clone()).upload_url(&submission).await.unwrap_err();

        assert!(matches!(err, RegistryError::ValidationFailed(ref v) if v.len() == 1));
        assert_eq!(issuer.signed_count(), 0);
    }

    #[tokio::test]
    async fn test_upload_url_rejects_metadata_unfit_for_headers() {
        let issuer = Arc::new(MemoryUrlIssuer::new());
        let submission = MetadataRecord::new("a.mp3", "Sigur Rós", "y", "z", "w");

        let err = service(issuer.clone()).upload_url(&submission).await.unwrap_err();

        assert!(matches!(
            err,
            RegistryError::ValidationFailed(ref v)
                if v.len() == 1 && v[0].field == MetadataField::Author && v[0].rule == Rule::HeaderSafe
        ));
        assert!(err.is_client_error());
        assert_eq!(issuer.signed_count(), 0);
    }

    #[tokio::test]
    async fn test_upload_url_rejects_oversized_metadata() {
        let issuer = Arc::new(MemoryUrlIssuer::new());
        let words = "w".repeat(validation::MAX_ATTACHED_METADATA_BYTES);
        let submission = MetadataRecord::new("a.mp3", "x", "y", "z", words.as_str());

        let err = service(issuer.clone()).upload_url(&submission).await.unwrap_err();

        assert!(matches!(
            err,
            RegistryError::ValidationFailed(ref v) if v[0].rule == Rule::AttachedMetadataTooLarge
        ));
        assert_eq!(issuer.signed_count(), 0);
    }

    #[tokio::test]
    async fn test_download_url_requires_filename() {
        let issuer = Arc::new(MemoryUrlIssuer::new());

        let err = service(issuer).download_url("").await.unwrap_err();
        assert!(matches!(err, RegistryError::ValidationFailed(_)));
    }

    #[tokio::test]
    async fn test_signing_failure_is_dependency_error() {
        let issuer = Arc::new(MemoryUrlIssuer::new());
        issuer.fail_signing(true);

        let err = service(issuer).download_url("a.mp3").await.unwrap_err();
        assert!(matches!(err, RegistryError::Dependency(_)));
    }
}
