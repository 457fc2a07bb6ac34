//! Signed-URL cache
//!
//! Pre-signed GET URLs are memoized per object path. An entry is served only
//! while `now + safety_margin < expires_at`; after that a fresh URL is minted
//! and overwrites the entry in place. The lock is never held across the
//! presign call.
//!
//! Lifetimes are clamped to what S3 honours, so an entry never outlives the
//! URL it holds.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::providers::{ObjectStore, PresignRequest, StoreError, MAX_PRESIGN_SECS};

/// Default upper bound for the safety margin (5 minutes)
pub const DEFAULT_SAFETY_MARGIN_SECS: u64 = 300;

/// Lifetime a presigned URL actually gets for a requested TTL
pub fn effective_ttl(ttl_secs: u64) -> u64 {
    ttl_secs.clamp(1, MAX_PRESIGN_SECS)
}

/// How a link should open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkMode {
    /// Displayed in the browser
    Inline,
    /// Saved as a download with the file's name
    Attachment,
}

impl LinkMode {
    /// `Content-Disposition` override for the signed response
    pub fn disposition(&self, file_name: &str) -> Option<String> {
        match self {
            LinkMode::Inline => None,
            LinkMode::Attachment => Some(format!(
                "attachment; filename=\"{}\"",
                file_name.replace('"', "")
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
    pub safety_margin: Duration,
}

impl CachedUrl {
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        now + self.safety_margin < self.expires_at
    }
}

pub struct SignedUrlCache {
    entries: Mutex<HashMap<String, CachedUrl>>,
    max_margin: Duration,
}

impl Default for SignedUrlCache {
    fn default() -> Self {
        Self::new(DEFAULT_SAFETY_MARGIN_SECS)
    }
}

impl SignedUrlCache {
    pub fn new(max_margin_secs: u64) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_margin: Duration::seconds(max_margin_secs.min(MAX_PRESIGN_SECS) as i64),
        }
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, CachedUrl>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Safety margin for a TTL: the configured margin, at most a quarter of the TTL
    pub fn margin_for(&self, ttl_secs: u64) -> Duration {
        self.max_margin.min(Duration::seconds(effective_ttl(ttl_secs) as i64 / 4))
    }

    /// Cached URL for `path`, or a freshly minted one valid for `ttl_secs`
    pub async fn get_or_create(
        &self,
        store: &dyn ObjectStore,
        path: &str,
        ttl_secs: u64,
    ) -> Result<String, StoreError> {
        self.get_or_create_at(store, path, ttl_secs, Utc::now()).await
    }

    pub async fn get_or_create_at(
        &self,
        store: &dyn ObjectStore,
        path: &str,
        ttl_secs: u64,
        now: DateTime<Utc>,
    ) -> Result<String, StoreError> {
        if let Some(url) = self.lookup(path, now) {
            return Ok(url);
        }

        let ttl_secs = effective_ttl(ttl_secs);
        let url = store.presign(&PresignRequest::get(path, ttl_secs)).await?;
        self.insert(path, url.clone(), ttl_secs, now);
        tracing::debug!("[Links] Minted {}s link for {}", ttl_secs, path);
        Ok(url)
    }

    /// Usable cached URL for `path`
    pub fn lookup(&self, path: &str, now: DateTime<Utc>) -> Option<String> {
        self.entries()
            .get(path)
            .filter(|entry| entry.is_usable(now))
            .map(|entry| entry.url.clone())
    }

    pub fn insert(&self, path: &str, url: String, ttl_secs: u64, now: DateTime<Utc>) {
        let entry = CachedUrl {
            url,
            expires_at: now + Duration::seconds(effective_ttl(ttl_secs) as i64),
            safety_margin: self.margin_for(ttl_secs),
        };
        self.entries().insert(path.to_string(), entry);
    }

    pub fn invalidate(&self, path: &str) -> bool {
        self.entries().remove(path).is_some()
    }

    /// Drop every entry under a key prefix
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|path, _| !path.starts_with(prefix));
        before - entries.len()
    }

    /// Drop entries that can no longer be served
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_usable(now));
        before - entries.len()
    }

    pub fn clear(&self) {
        self.entries().clear();
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}
