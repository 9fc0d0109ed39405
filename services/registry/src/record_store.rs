use crate::metadata::MetadataRecord;
use anyhow::Result;
use async_trait::async_trait;

/// Result of a conditional create
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// A record already lives under the key; nothing was written
    AlreadyExists,
}

/// Durable key-value store of metadata records, keyed by filename
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch the record stored under `filename`
    async fn get(&self, filename: &str) -> Result<Option<MetadataRecord>>;

    /// Write `record`, fully replacing any record under the same filename
    async fn put(&self, record: &MetadataRecord) -> Result<()>;

    /// Write `record` only if no record exists under its filename
    async fn create(&self, record: &MetadataRecord) -> Result<CreateOutcome>;

    /// Every stored record, in no particular order
    async fn scan(&self) -> Result<Vec<MetadataRecord>>;

    /// Cheap reachability check for readiness probes
    async fn ping(&self) -> Result<()>;
}
