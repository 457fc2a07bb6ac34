//! In-memory object store
//!
//! Keeps objects in an ordered map and reproduces the S3 ListObjectsV2
//! pagination rules (delimiter grouping, `max_keys` counting both objects and
//! common prefixes, opaque continuation cursor). Used by tests and offline runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use super::{
    DeleteObjectsOutcome, ListObjectsPage, ListObjectsRequest, ObjectStore, ObjectSummary,
    PresignRequest, StoreError, MAX_PRESIGN_SECS,
};

/// Default and maximum page size, as in S3
pub const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone)]
struct StoredObject {
    body: Vec<u8>,
    content_type: Option<String>,
    last_modified: DateTime<Utc>,
}

/// Ordered in-process object store
pub struct MemoryStore {
    bucket: String,
    objects: Mutex<BTreeMap<String, StoredObject>>,
    page_size: usize,
    presign_counter: AtomicU64,
}

impl MemoryStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: Mutex::new(BTreeMap::new()),
            page_size: DEFAULT_PAGE_SIZE,
            presign_counter: AtomicU64::new(0),
        }
    }

    /// Cap every listing page at `page_size` items
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn objects(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, StoredObject>> {
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store an object synchronously (seeding helper)
    pub fn insert(&self, key: impl Into<String>, body: impl Into<Vec<u8>>) {
        self.insert_at(key, body, Utc::now());
    }

    /// Store an object with an explicit modification time
    pub fn insert_at(&self, key: impl Into<String>, body: impl Into<Vec<u8>>, last_modified: DateTime<Utc>) {
        self.objects().insert(
            key.into(),
            StoredObject {
                body: body.into(),
                content_type: None,
                last_modified,
            },
        );
    }

    /// All keys currently stored, in order
    pub fn keys(&self) -> Vec<String> {
        self.objects().keys().cloned().collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects().contains_key(key)
    }

    /// Body of a stored object
    pub fn body(&self, key: &str) -> Option<Vec<u8>> {
        self.objects().get(key).map(|o| o.body.clone())
    }

    /// Content type recorded for a stored object
    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects().get(key).and_then(|o| o.content_type.clone())
    }

    pub fn len(&self) -> usize {
        self.objects().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects().is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn display_name(&self) -> String {
        format!("memory://{}", self.bucket)
    }

    async fn list_objects(&self, request: &ListObjectsRequest) -> Result<ListObjectsPage, StoreError> {
        let limit = request
            .max_keys
            .map(|n| n as usize)
            .unwrap_or(self.page_size)
            .clamp(1, self.page_size);
        let prefix = request.prefix.as_str();
        let delimiter = request.delimiter.as_deref().filter(|d| !d.is_empty());

        let start = match request.continuation_token.as_deref() {
            Some(token) => Bound::Excluded(token),
            None => Bound::Included(prefix),
        };

        // A cursor pointing at a common prefix resumes after everything it groups
        let mut last_prefix: Option<String> = match (request.continuation_token.as_deref(), delimiter) {
            (Some(token), Some(d)) if token.len() > prefix.len() && token.ends_with(d) => {
                Some(token.to_string())
            }
            _ => None,
        };

        let objects = self.objects();
        let mut page = ListObjectsPage::default();
        let mut emitted = 0usize;
        let mut last_item: Option<String> = None;

        for (key, object) in objects
            .range::<str, _>((start, Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
        {
            if let Some(ref grouped) = last_prefix {
                if key.starts_with(grouped.as_str()) {
                    continue;
                }
            }

            let common_prefix = delimiter.and_then(|d| {
                let rest = &key[prefix.len()..];
                rest.find(d)
                    .map(|pos| format!("{}{}", prefix, &rest[..pos + d.len()]))
            });

            if emitted == limit {
                page.is_truncated = true;
                break;
            }
            emitted += 1;

            match common_prefix {
                Some(common_prefix) => {
                    page.common_prefixes.push(common_prefix.clone());
                    last_item = Some(common_prefix.clone());
                    last_prefix = Some(common_prefix);
                }
                None => {
                    page.objects.push(ObjectSummary {
                        key: key.clone(),
                        size: object.body.len() as u64,
                        last_modified: Some(object.last_modified),
                    });
                    last_item = Some(key.clone());
                }
            }
        }

        if page.is_truncated {
            page.next_continuation_token = last_item;
        }
        Ok(page)
    }

    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<(), StoreError> {
        self.objects().insert(
            key.to_string(),
            StoredObject {
                body,
                content_type: content_type.map(str::to_string),
                last_modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.body(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn delete_object(&self, key: &str) -> Result<(), StoreError> {
        self.objects().remove(key);
        Ok(())
    }

    async fn delete_objects(&self, keys: &[String]) -> Result<DeleteObjectsOutcome, StoreError> {
        let mut objects = self.objects();
        for key in keys {
            objects.remove(key);
        }
        Ok(DeleteObjectsOutcome {
            deleted: keys.len(),
            errors: Vec::new(),
        })
    }

    async fn presign(&self, request: &PresignRequest) -> Result<String, StoreError> {
        let n = self.presign_counter.fetch_add(1, Ordering::Relaxed);
        let expires = Utc::now().timestamp() + request.expires_in_secs.min(MAX_PRESIGN_SECS) as i64;
        let mut url = format!(
            "memory://{}/{}?op=GET&expires={}&n={}",
            self.bucket,
            request.key,
            expires,
            n
        );
        if let Some(ref disposition) = request.response_content_disposition {
            url.push_str("&response-content-disposition=");
            url.push_str(&urlencoding::encode(disposition));
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(page_size: usize) -> MemoryStore {
        let store = MemoryStore::new("bucket").with_page_size(page_size);
        for key in [
            "alice/",
            "alice/a.txt",
            "alice/b.txt",
            "alice/docs/",
            "alice/docs/x.pdf",
            "alice/docs/y.pdf",
            "alice/music/",
            "alice/z.txt",
            "bob/secret.txt",
        ] {
            store.insert(key, key.as_bytes().to_vec());
        }
        store
    }

    async fn collect_all(store: &MemoryStore, base: ListObjectsRequest) -> (Vec<String>, Vec<String>, usize) {
        let mut prefixes = Vec::new();
        let mut keys = Vec::new();
        let mut pages = 0;
        let mut token = None;
        loop {
            let page = store
                .list_objects(&base.clone().with_continuation(token))
                .await
                .unwrap();
            pages += 1;
            prefixes.extend(page.common_prefixes.iter().cloned());
            keys.extend(page.objects.iter().map(|o| o.key.clone()));
            match page.next_token() {
                Some(next) => token = Some(next.to_string()),
                None => break,
            }
        }
        (prefixes, keys, pages)
    }

    #[tokio::test]
    async fn test_delimited_listing_groups_folders() {
        let store = seeded(1000);
        let page = store
            .list_objects(&ListObjectsRequest::children("alice/"))
            .await
            .unwrap();
        assert_eq!(page.common_prefixes, vec!["alice/docs/", "alice/music/"]);
        let keys: Vec<_> = page.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["alice/", "alice/a.txt", "alice/b.txt", "alice/z.txt"]);
        assert!(!page.is_truncated);
    }

    #[tokio::test]
    async fn test_pagination_matches_single_page() {
        let (all_prefixes, all_keys, _) = collect_all(&seeded(1000), ListObjectsRequest::children("alice/")).await;

        for page_size in 1..=4 {
            let (prefixes, keys, pages) =
                collect_all(&seeded(page_size), ListObjectsRequest::children("alice/")).await;
            assert_eq!(prefixes, all_prefixes, "page size {}", page_size);
            assert_eq!(keys, all_keys, "page size {}", page_size);
            assert!(pages >= 6 / page_size);
        }
    }

    #[tokio::test]
    async fn test_recursive_listing_pages() {
        let store = seeded(2);
        let (prefixes, keys, pages) = collect_all(&store, ListObjectsRequest::recursive("alice/docs/")).await;
        assert!(prefixes.is_empty());
        assert_eq!(keys, vec!["alice/docs/", "alice/docs/x.pdf", "alice/docs/y.pdf"]);
        assert_eq!(pages, 2);
    }

    #[tokio::test]
    async fn test_max_keys_hint() {
        let store = seeded(1000);
        let page = store
            .list_objects(&ListObjectsRequest::recursive("alice/").with_max_keys(Some(3)))
            .await
            .unwrap();
        assert_eq!(page.objects.len(), 3);
        assert_eq!(page.next_token(), Some("alice/b.txt"));
    }

    #[tokio::test]
    async fn test_delete_missing_key_succeeds() {
        let store = seeded(1000);
        store.delete_object("alice/nope.txt").await.unwrap();
        let outcome = store
            .delete_objects(&["alice/a.txt".to_string(), "alice/ghost".to_string()])
            .await
            .unwrap();
        assert!(outcome.is_complete());
        assert!(!store.contains("alice/a.txt"));
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = MemoryStore::new("bucket");
        assert!(matches!(
            store.get_object("x").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_presign_urls_are_unique() {
        let store = MemoryStore::new("bucket");
        let request = PresignRequest::get("alice/a.txt", 60);
        let first = store.presign(&request).await.unwrap();
        let second = store.presign(&request).await.unwrap();
        assert_ne!(first, second);
        assert!(first.starts_with("memory://bucket/alice/a.txt?op=GET"));
    }
}
