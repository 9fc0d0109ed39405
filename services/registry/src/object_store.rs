use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// Result of a metadata-only existence probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectProbe {
    /// The object exists; carries its attached user metadata
    Found { metadata: HashMap<String, String> },
    /// No object under the key
    NotFound,
}

impl ObjectProbe {
    pub fn exists(&self) -> bool {
        matches!(self, ObjectProbe::Found { .. })
    }
}

/// Blob store holding the audio files.
///
/// `NotFound` is a normal answer. An `Err` means the store could not answer
/// and must never be read as "not found".
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Check whether `key` exists in `bucket` without transferring its body
    async fn probe(&self, bucket: &str, key: &str) -> Result<ObjectProbe>;
}
