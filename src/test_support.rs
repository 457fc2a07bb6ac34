//! Store doubles shared by the unit tests

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

use crate::providers::{
    DeleteFailure, DeleteObjectsOutcome, ListObjectsPage, ListObjectsRequest, MemoryStore,
    ObjectStore, PresignRequest, StoreError,
};

/// Failures to inject into a `FaultyStore`
#[derive(Debug, Default)]
pub struct Faults {
    /// Fail the n-th (0-based) list call
    pub fail_list_call: Option<usize>,
    /// Fail the n-th (0-based) batch delete call
    pub fail_delete_batch_call: Option<usize>,
    /// Keys the batch delete reports as per-key errors
    pub reject_keys: HashSet<String>,
    /// Keys whose download fails
    pub fail_get_keys: HashSet<String>,
    /// Keys whose upload fails
    pub fail_put_keys: HashSet<String>,
    /// Every call fails with an expired-credentials error
    pub expired: bool,
}

/// Memory store wrapper with injectable failures and call counters
pub struct FaultyStore {
    pub inner: Arc<MemoryStore>,
    pub faults: Mutex<Faults>,
    pub list_calls: AtomicUsize,
    pub delete_batch_calls: AtomicUsize,
    pub presign_calls: AtomicUsize,
    pub get_calls: AtomicUsize,
}

impl FaultyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            faults: Mutex::new(Faults::default()),
            list_calls: AtomicUsize::new(0),
            delete_batch_calls: AtomicUsize::new(0),
            presign_calls: AtomicUsize::new(0),
            get_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_faults(self, faults: Faults) -> Self {
        *self.faults.lock().unwrap() = faults;
        self
    }

    pub fn presigns(&self) -> usize {
        self.presign_calls.load(Ordering::SeqCst)
    }

    fn check_expired(&self) -> Result<(), StoreError> {
        if self.faults.lock().unwrap().expired {
            return Err(StoreError::AuthenticationFailed(
                "ExpiredToken: The provided token has expired.".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for FaultyStore {
    fn display_name(&self) -> String {
        format!("faulty {}", self.inner.display_name())
    }

    async fn list_objects(&self, request: &ListObjectsRequest) -> Result<ListObjectsPage, StoreError> {
        self.check_expired()?;
        let call = self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.faults.lock().unwrap().fail_list_call == Some(call) {
            return Err(StoreError::NetworkError("connection reset".to_string()));
        }
        self.inner.list_objects(request).await
    }

    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: Option<&str>) -> Result<(), StoreError> {
        self.check_expired()?;
        if self.faults.lock().unwrap().fail_put_keys.contains(key) {
            return Err(StoreError::TransferFailed(format!("upload of {} failed", key)));
        }
        self.inner.put_object(key, body, content_type).await
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.check_expired()?;
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if self.faults.lock().unwrap().fail_get_keys.contains(key) {
            return Err(StoreError::TransferFailed(format!("download of {} failed", key)));
        }
        self.inner.get_object(key).await
    }

    async fn delete_object(&self, key: &str) -> Result<(), StoreError> {
        self.check_expired()?;
        self.inner.delete_object(key).await
    }

    async fn delete_objects(&self, keys: &[String]) -> Result<DeleteObjectsOutcome, StoreError> {
        self.check_expired()?;
        let call = self.delete_batch_calls.fetch_add(1, Ordering::SeqCst);
        let (fail, rejected): (bool, Vec<String>) = {
            let faults = self.faults.lock().unwrap();
            (
                faults.fail_delete_batch_call == Some(call),
                keys.iter().filter(|k| faults.reject_keys.contains(*k)).cloned().collect(),
            )
        };
        if fail {
            return Err(StoreError::ServerError("Batch delete failed (503)".to_string()));
        }

        let accepted: Vec<String> = keys.iter().filter(|k| !rejected.contains(k)).cloned().collect();
        let mut outcome = self.inner.delete_objects(&accepted).await?;
        outcome.errors = rejected
            .into_iter()
            .map(|key| DeleteFailure {
                key,
                code: "AccessDenied".to_string(),
                message: "Access Denied".to_string(),
            })
            .collect();
        Ok(outcome)
    }

    async fn presign(&self, request: &PresignRequest) -> Result<String, StoreError> {
        self.check_expired()?;
        self.presign_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.presign(request).await
    }
}

/// Memory store whose listings of selected prefixes block until released
pub struct GatedStore {
    pub inner: Arc<MemoryStore>,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl GatedStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            gates: Mutex::new(HashMap::new()),
        }
    }

    /// Hold listings of `prefix` until `open` is called
    pub fn close(&self, prefix: &str) {
        self.gates
            .lock()
            .unwrap()
            .insert(prefix.to_string(), Arc::new(Semaphore::new(0)));
    }

    pub fn open(&self, prefix: &str) {
        if let Some(gate) = self.gates.lock().unwrap().get(prefix) {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }
}

#[async_trait]
impl ObjectStore for GatedStore {
    fn display_name(&self) -> String {
        format!("gated {}", self.inner.display_name())
    }

    async fn list_objects(&self, request: &ListObjectsRequest) -> Result<ListObjectsPage, StoreError> {
        let gate = self.gates.lock().unwrap().get(&request.prefix).cloned();
        if let Some(gate) = gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|e| StoreError::NetworkError(e.to_string()))?;
        }
        self.inner.list_objects(request).await
    }

    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: Option<&str>) -> Result<(), StoreError> {
        self.inner.put_object(key, body, content_type).await
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.inner.get_object(key).await
    }

    async fn delete_object(&self, key: &str) -> Result<(), StoreError> {
        self.inner.delete_object(key).await
    }

    async fn delete_objects(&self, keys: &[String]) -> Result<DeleteObjectsOutcome, StoreError> {
        self.inner.delete_objects(keys).await
    }

    async fn presign(&self, request: &PresignRequest) -> Result<String, StoreError> {
        self.inner.presign(request).await
    }
}

/// Memory store seeded with the given keys; bodies are the key bytes.
/// Every object carries the same modification time so listings compare equal.
pub fn seeded_store(keys: &[&str], page_size: usize) -> Arc<MemoryStore> {
    let seeded_at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let store = MemoryStore::new("drive").with_page_size(page_size);
    for key in keys {
        store.insert_at(*key, key.as_bytes().to_vec(), seeded_at);
    }
    Arc::new(store)
}
