//! In-process store and signer backends.
//!
//! Used by tests and by `record_store.backend = "memory"` for local runs.
//! Each backend counts its calls and can be told to fail specific keys so
//! callers can assert which collaborators were reached.

use crate::metadata::MetadataRecord;
use crate::object_store::{ObjectProbe, ObjectStore};
use crate::presigned_urls::{expires_at, PresignedUrl, UrlIssuer};
use crate::record_store::{CreateOutcome, RecordStore};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Object store holding attribute maps instead of bodies
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<(String, String), HashMap<String, String>>>,
    failing_keys: Mutex<HashSet<String>>,
    probes: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object with its attached metadata
    pub fn insert(&self, bucket: &str, key: &str, metadata: HashMap<String, String>) {
        lock(&self.objects).insert((bucket.to_string(), key.to_string()), metadata);
    }

    pub fn remove(&self, bucket: &str, key: &str) {
        lock(&self.objects).remove(&(bucket.to_string(), key.to_string()));
    }

    /// Make every probe of `key` fail as if the store were unreachable
    pub fn fail_key(&self, key: &str) {
        lock(&self.failing_keys).insert(key.to_string());
    }

    /// Undo every `fail_key`
    pub fn clear_failures(&self) {
        lock(&self.failing_keys).clear();
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn probe(&self, bucket: &str, key: &str) -> Result<ObjectProbe> {
        self.probes.fetch_add(1, Ordering::SeqCst);

        if lock(&self.failing_keys).contains(key) {
            bail!("object store unavailable for {bucket}/{key}");
        }

        Ok(match lock(&self.objects).get(&(bucket.to_string(), key.to_string())) {
            Some(metadata) => ObjectProbe::Found {
                metadata: metadata.clone(),
            },
            None => ObjectProbe::NotFound,
        })
    }
}

/// Record store backed by a map, optionally logging every accepted write
#[derive(Default)]
pub struct MemoryRecordStore {
    records: Mutex<HashMap<String, MetadataRecord>>,
    // Only kept when built with `with_write_log`
    writes: Option<Mutex<Vec<MetadataRecord>>>,
    failing_writes: Mutex<HashSet<String>>,
    fail_reads: AtomicBool,
    gets: AtomicUsize,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that also remembers every write, for assertions
    pub fn with_write_log() -> Self {
        Self {
            writes: Some(Mutex::default()),
            ..Self::default()
        }
    }

    /// Seed a record without recording a write
    pub fn insert(&self, record: MetadataRecord) {
        lock(&self.records).insert(record.filename.clone(), record);
    }

    /// Every record written through `put` or `create`, in call order.
    /// Always empty unless the store was built with `with_write_log`.
    pub fn writes(&self) -> Vec<MetadataRecord> {
        self.writes
            .as_ref()
            .map(|log| lock(log).clone())
            .unwrap_or_default()
    }

    fn log_write(&self, record: &MetadataRecord) {
        if let Some(log) = &self.writes {
            lock(log).push(record.clone());
        }
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make writes of `filename` fail
    pub fn fail_writes_for(&self, filename: &str) {
        lock(&self.failing_writes).insert(filename.to_string());
    }

    /// Make `get` and `scan` fail
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    fn check_write(&self, filename: &str) -> Result<()> {
        if lock(&self.failing_writes).contains(filename) {
            bail!("record store rejected write of {filename}");
        }
        Ok(())
    }

    fn check_read(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            bail!("record store unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get(&self, filename: &str) -> Result<Option<MetadataRecord>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.check_read()?;
        Ok(lock(&self.records).get(filename).cloned())
    }

    async fn put(&self, record: &MetadataRecord) -> Result<()> {
        self.check_write(&record.filename)?;
        lock(&self.records).insert(record.filename.clone(), record.clone());
        self.log_write(record);
        Ok(())
    }

    async fn create(&self, record: &MetadataRecord) -> Result<CreateOutcome> {
        self.check_write(&record.filename)?;
        match lock(&self.records).entry(record.filename.clone()) {
            Entry::Occupied(_) => return Ok(CreateOutcome::AlreadyExists),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
            }
        }
        self.log_write(record);
        Ok(CreateOutcome::Created)
    }

    async fn scan(&self) -> Result<Vec<MetadataRecord>> {
        self.check_read()?;
        Ok(lock(&self.records).values().cloned().collect())
    }

    async fn ping(&self) -> Result<()> {
        self.check_read()
    }
}

struct SignedRequest {
    key: String,
    method: &'static str,
    attributes: HashMap<String, String>,
}

/// Signer producing `memory://` URLs and remembering what it signed
#[derive(Default)]
pub struct MemoryUrlIssuer {
    signed: Mutex<Vec<SignedRequest>>,
    fail: AtomicBool,
}

impl MemoryUrlIssuer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_signing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn signed_count(&self) -> usize {
        lock(&self.signed).len()
    }

    /// Attributes bound to the most recent upload URL for `key`
    pub fn signed_attributes(&self, key: &str) -> Option<HashMap<String, String>> {
        lock(&self.signed)
            .iter()
            .rev()
            .find(|s| s.key == key && s.method == "PUT")
            .map(|s| s.attributes.clone())
    }

    fn sign(
        &self,
        bucket: &str,
        key: &str,
        method: &'static str,
        attributes: HashMap<String, String>,
        expiry: Duration,
    ) -> Result<PresignedUrl> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("signing unavailable");
        }

        let expires_at = expires_at(expiry)?;
        let url = format!(
            "memory://{}/{}?method={}&expires={}",
            bucket,
            urlencoding::encode(key),
            method,
            expires_at.timestamp()
        );

        lock(&self.signed).push(SignedRequest {
            key: key.to_string(),
            method,
            attributes,
        });

        Ok(PresignedUrl {
            url,
            method: method.to_string(),
            expires_at,
        })
    }
}

#[async_trait]
impl UrlIssuer for MemoryUrlIssuer {
    async fn presign_put(
        &self,
        bucket: &str,
        key: &str,
        attributes: &HashMap<String, String>,
        expiry: Duration,
    ) -> Result<PresignedUrl> {
        self.sign(bucket, key, "PUT", attributes.clone(), expiry)
    }

    async fn presign_get(&self, bucket: &str, key: &str, expiry: Duration) -> Result<PresignedUrl> {
        self.sign(bucket, key, "GET", HashMap::new(), expiry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_probe_found_and_missing() {
        let store = MemoryObjectStore::new();
        store.insert("audio", "a.mp3", HashMap::new());

        assert!(store.probe("audio", "a.mp3").await.unwrap().exists());
        assert_eq!(
            store.probe("audio", "b.mp3").await.unwrap(),
            ObjectProbe::NotFound
        );
        assert_eq!(
            store.probe("other", "a.mp3").await.unwrap(),
            ObjectProbe::NotFound
        );
        assert_eq!(store.probe_count(), 3);
    }

    #[tokio::test]
    async fn test_failing_key_is_an_error_not_absence() {
        let store = MemoryObjectStore::new();
        store.fail_key("a.mp3");

        assert!(store.probe("audio", "a.mp3").await.is_err());
    }

    #[tokio::test]
    async fn test_put_replaces_existing_record() {
        let store = MemoryRecordStore::with_write_log();
        store
            .put(&MetadataRecord::new("a.mp3", "x", "y", "z", "w"))
            .await
            .unwrap();
        store
            .put(&MetadataRecord::new("a.mp3", "x2", "y2", "z2", "w2"))
            .await
            .unwrap();

        let stored = store.get("a.mp3").await.unwrap().unwrap();
        assert_eq!(stored.author, "x2");
        assert_eq!(store.len(), 1);
        assert_eq!(store.writes().len(), 2);
    }

    #[tokio::test]
    async fn test_create_is_conditional() {
        let store = MemoryRecordStore::with_write_log();
        let record = MetadataRecord::new("a.mp3", "x", "y", "z", "w");

        assert_eq!(store.create(&record).await.unwrap(), CreateOutcome::Created);
        assert_eq!(
            store.create(&record).await.unwrap(),
            CreateOutcome::AlreadyExists
        );
        assert_eq!(store.writes().len(), 1);
    }

    #[tokio::test]
    async fn test_runtime_store_keeps_no_write_log() {
        let store = MemoryRecordStore::new();
        for i in 0..3 {
            let record = MetadataRecord::new(&format!("{i}.mp3"), "x", "y", "z", "w");
            store.put(&record).await.unwrap();
            store.create(&record).await.unwrap();
        }

        assert_eq!(store.len(), 3);
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn test_cleared_failures_restore_lookups() {
        let store = MemoryObjectStore::new();
        store.insert("audio", "a.mp3", HashMap::new());
        store.fail_key("a.mp3");
        assert!(store.probe("audio", "a.mp3").await.is_err());

        store.clear_failures();

        assert!(matches!(
            store.probe("audio", "a.mp3").await.unwrap(),
            ObjectProbe::Found { .. }
        ));
    }

    #[tokio::test]
    async fn test_url_issuer_encodes_key() {
        let issuer = MemoryUrlIssuer::new();

        let url = issuer
            .presign_get("audio", "my song.mp3", Duration::from_secs(60))
            .await
            .unwrap();

        assert!(url.url.starts_with("memory://audio/my%20song.mp3?method=GET"));
        assert_eq!(issuer.signed_count(), 1);
        assert!(issuer.signed_attributes("my song.mp3").is_none());
    }
}
