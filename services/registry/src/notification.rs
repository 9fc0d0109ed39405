//! Storage write notifications.
//!
//! Notifications use the S3 event format. Only the bucket and key are taken
//! from them; metadata is always read back from the object itself.

use serde::Deserialize;
use thiserror::Error;

/// Errors decoding a notification payload
#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("Malformed storage notification: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Object key {key:?} is not valid percent-encoded UTF-8")]
    InvalidKey {
        key: String,
        #[source]
        source: std::string::FromUtf8Error,
    },
}

/// One object written to the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectNotification {
    pub bucket: String,
    pub key: String,
}

/// S3 event notification envelope
#[derive(Debug, Clone, Deserialize)]
pub struct StorageEvent {
    #[serde(rename = "Records", default)]
    pub records: Vec<StorageEventRecord>,
    /// Set on `s3:TestEvent` messages, which carry no records
    #[serde(rename = "Event")]
    pub event: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageEventRecord {
    pub event_name: String,
    pub s3: S3Entity,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Entity {
    pub bucket: S3Bucket,
    pub object: S3Object,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Bucket {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Object {
    /// URL-encoded object key
    pub key: String,
}

impl StorageEvent {
    pub fn parse(payload: &[u8]) -> Result<Self, NotificationError> {
        Ok(serde_json::from_slice(payload)?)
    }

    pub fn is_test_event(&self) -> bool {
        self.event.as_deref() == Some("s3:TestEvent")
    }
}

impl StorageEventRecord {
    pub fn is_object_created(&self) -> bool {
        self.event_name.starts_with("ObjectCreated:")
    }

    /// The written object, or `None` for events other than object creation
    pub fn object_notification(&self) -> Result<Option<ObjectNotification>, NotificationError> {
        if !self.is_object_created() {
            return Ok(None);
        }

        Ok(Some(ObjectNotification {
            bucket: self.s3.bucket.name.clone(),
            key: decode_object_key(&self.s3.object.key)?,
        }))
    }
}

/// Decode a key as it appears in S3 notifications (`+` for space, then percent-encoding)
pub fn decode_object_key(raw: &str) -> Result<String, NotificationError> {
    let plus_decoded = raw.replace('+', " ");
    urlencoding::decode(&plus_decoded)
        .map(|key| key.into_owned())
        .map_err(|source| NotificationError::InvalidKey {
            key: raw.to_string(),
            source,
        })
}
