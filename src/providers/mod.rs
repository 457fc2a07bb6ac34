//! Object Store Providers
//!
//! The drive never talks to a store directly. Everything goes through the
//! `ObjectStore` capability trait, so the same listing, bulk and upload code
//! runs against S3 (or any S3-compatible service) and the in-memory store.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │             ObjectStore Trait               │
//! │  list, put, get, delete, batch delete, sign │
//! └─────────────────────────────────────────────┘
//!                      │
//!            ┌─────────┴─────────┐
//!            ▼                   ▼
//!       ┌────────┐         ┌──────────┐
//!       │   S3   │         │  Memory  │
//!       └────────┘         └──────────┘
//! ```

pub mod types;
pub mod s3;
pub mod memory;

pub use types::*;
pub use s3::S3Provider;
pub use memory::MemoryStore;

use async_trait::async_trait;

/// Capability interface of a flat, prefix-listable object store.
///
/// All keys are full store keys; namespace scoping happens above this layer.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Get display name for this store instance
    fn display_name(&self) -> String;

    /// List one page of objects (and common prefixes when a delimiter is set)
    async fn list_objects(&self, request: &ListObjectsRequest) -> Result<ListObjectsPage, StoreError>;

    /// Store an object, replacing any previous body
    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Store an object while reporting `(loaded, total)` progress.
    ///
    /// Stores without streaming support report completion once.
    async fn upload_object(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: Option<&str>,
        on_progress: Option<ProgressCallback>,
    ) -> Result<(), StoreError> {
        let total = body.len() as u64;
        self.put_object(key, body, content_type).await?;
        if let Some(progress) = on_progress {
            progress(total, total);
        }
        Ok(())
    }

    /// Download an object body to memory
    async fn get_object(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Delete a single object. Deleting a missing key succeeds.
    async fn delete_object(&self, key: &str) -> Result<(), StoreError>;

    /// Delete a batch of objects in one call
    async fn delete_objects(&self, keys: &[String]) -> Result<DeleteObjectsOutcome, StoreError>;

    /// Mint a time-limited capability URL for one object
    async fn presign(&self, request: &PresignRequest) -> Result<String, StoreError>;
}
