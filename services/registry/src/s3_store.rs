use crate::config::S3Config;
use crate::object_store::{ObjectProbe, ObjectStore};
use crate::presigned_urls::{expires_at, PresignedUrl, UrlIssuer};
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::Client as S3Client;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// S3-backed object store and URL signer for the audio bucket
pub struct S3ObjectStore {
    client: S3Client,
}

impl S3ObjectStore {
    /// Create a new S3 object store
    pub async fn new(config: &S3Config) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 object store initialized"
        );

        Ok(Self { client })
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self))]
    async fn probe(&self, bucket: &str, key: &str) -> Result<ObjectProbe> {
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(output) => {
                let metadata = output.metadata().cloned().unwrap_or_default();
                debug!(attributes = metadata.len(), "Object found");
                Ok(ObjectProbe::Found { metadata })
            }
            Err(e) => {
                if e.as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    debug!("Object not found");
                    Ok(ObjectProbe::NotFound)
                } else {
                    Err(e).context("Failed to check object existence")
                }
            }
        }
    }
}

#[async_trait]
impl UrlIssuer for S3ObjectStore {
    #[instrument(skip(self, attributes))]
    async fn presign_put(
        &self,
        bucket: &str,
        key: &str,
        attributes: &HashMap<String, String>,
        expiry: Duration,
    ) -> Result<PresignedUrl> {
        let presigning_config =
            PresigningConfig::expires_in(expiry).context("Failed to create presigning config")?;

        let presigned = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .set_metadata(Some(attributes.clone()))
            .presigned(presigning_config)
            .await
            .context("Failed to generate presigned upload URL")?;

        Ok(PresignedUrl {
            url: presigned.uri().to_string(),
            method: presigned.method().to_string(),
            expires_at: expires_at(expiry)?,
        })
    }

    #[instrument(skip(self))]
    async fn presign_get(&self, bucket: &str, key: &str, expiry: Duration) -> Result<PresignedUrl> {
        let presigning_config =
            PresigningConfig::expires_in(expiry).context("Failed to create presigning config")?;

        let presigned = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(presigning_config)
            .await
            .context("Failed to generate presigned download URL")?;

        Ok(PresignedUrl {
            url: presigned.uri().to_string(),
            method: presigned.method().to_string(),
            expires_at: expires_at(expiry)?,
        })
    }
}
