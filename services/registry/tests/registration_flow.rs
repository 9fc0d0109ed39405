//! End-to-end registration through the public API, backed by in-process stores.

use audio_registry::config::{IngestionConfig, S3Config};
use audio_registry::memory::{MemoryObjectStore, MemoryRecordStore, MemoryUrlIssuer};
use audio_registry::{
    MetadataRecord, ObjectNotification, RecordStore, Registry, RegistryError, UrlService,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

const BUCKET: &str = "audio";

struct Fixture {
    objects: Arc<MemoryObjectStore>,
    records: Arc<MemoryRecordStore>,
    issuer: Arc<MemoryUrlIssuer>,
    registry: Registry,
    urls: UrlService,
}

fn fixture() -> Fixture {
    let s3: S3Config =
        serde_json::from_value(serde_json::json!({ "bucket": BUCKET })).expect("s3 config");
    let objects = Arc::new(MemoryObjectStore::new());
    let records = Arc::new(MemoryRecordStore::with_write_log());
    let issuer = Arc::new(MemoryUrlIssuer::new());

    let registry = Registry::new(
        objects.clone(),
        records.clone(),
        &s3,
        &IngestionConfig::default(),
    );
    let urls = UrlService::new(issuer.clone(), BUCKET, Duration::from_secs(300));

    Fixture {
        objects,
        records,
        issuer,
        registry,
        urls,
    }
}

#[tokio::test]
async fn submit_then_resubmit_is_duplicate() {
    let f = fixture();
    let record = MetadataRecord::new("a.mp3", "x", "y", "z", "w");
    f.objects.insert(BUCKET, "a.mp3", Default::default());

    f.registry
        .create_from_submission(&record)
        .await
        .expect("first submission");
    assert_eq!(f.records.writes(), vec![record.clone()]);

    let err = f.registry.create_from_submission(&record).await.unwrap_err();
    assert!(matches!(err, RegistryError::DuplicateRecord { ref filename } if filename == "a.mp3"));
    assert_eq!(f.records.writes().len(), 1);
}

#[tokio::test]
async fn presigned_upload_feeds_ingestion() {
    let f = fixture();
    let record = MetadataRecord::new("song.mp3", "ann", "demo", "mp3", "la la");

    // Client asks for an upload URL, then the upload lands with the bound metadata
    f.urls.upload_url(&record).await.expect("upload url");
    let attributes = f.issuer.signed_attributes("song.mp3").expect("signed put");
    f.objects.insert(BUCKET, "song.mp3", attributes);

    let report = f
        .registry
        .ingest_batch(&[ObjectNotification {
            bucket: BUCKET.to_string(),
            key: "song.mp3".to_string(),
        }])
        .await;

    assert!(report.is_complete());
    let stored = f.records.get("song.mp3").await.expect("read back");
    assert_eq!(stored, Some(record));
}

#[tokio::test]
async fn listing_returns_every_registered_record() {
    let f = fixture();
    assert!(f.registry.list().await.expect("empty listing").is_empty());

    let mut expected = HashSet::new();
    for name in ["a.mp3", "b.mp3", "c.mp3"] {
        f.objects.insert(BUCKET, name, Default::default());
        let record = MetadataRecord::new(name, "x", "y", "z", "w");
        f.registry
            .create_from_submission(&record)
            .await
            .expect("submission");
        expected.insert(name.to_string());
    }

    let listed: HashSet<String> = f
        .registry
        .list()
        .await
        .expect("listing")
        .into_iter()
        .map(|r| r.filename)
        .collect();
    assert_eq!(listed, expected);
}
