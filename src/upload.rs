//! Upload pipeline
//!
//! Files are uploaded one after another into a folder of the namespace. Each
//! upload reports byte progress; an optional transform derives a thumbnail
//! that is stored under the reserved `.thumbnails` folder of the root.

use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{DriveError, DriveResult};
use crate::namespace::{full_path, validate_segment, FolderPath, NamespaceRoot, SEPARATOR};
use crate::providers::{ObjectStore, ProgressCallback, StoreError};
use crate::thumbnail::ArtifactTransform;

/// Reserved folder (directly under the root) holding derived thumbnails
pub const THUMBNAIL_FOLDER: &str = ".thumbnails";

/// Key of the thumbnail for a file at `relative_path` (relative to the root)
pub fn thumbnail_key(root: &NamespaceRoot, relative_path: &str) -> String {
    format!(
        "{}{}{}{}.jpg",
        root.prefix(),
        THUMBNAIL_FOLDER,
        SEPARATOR,
        relative_path.trim_start_matches(SEPARATOR)
    )
}

/// Prefix holding the thumbnails of everything inside folder `relative_folder`
pub fn thumbnail_folder_prefix(root: &NamespaceRoot, relative_folder: &str) -> String {
    format!(
        "{}{}{}{}{}",
        root.prefix(),
        THUMBNAIL_FOLDER,
        SEPARATOR,
        relative_folder.trim_matches(SEPARATOR),
        SEPARATOR
    )
}

/// Byte progress of the file being uploaded: `(name, loaded, total)`
pub type UploadProgress = Arc<dyn Fn(&str, u64, u64) + Send + Sync>;

/// A file handed to the pipeline
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            body: body.into(),
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Read a local file; the upload name is its file name
    pub async fn from_path(path: &Path) -> DriveResult<Self> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| DriveError::InvalidName(path.display().to_string()))?
            .to_string();
        let body = tokio::fs::read(path).await?;
        Ok(Self::new(name, body))
    }

    /// Declared content type, or a guess from the file name
    pub fn resolved_content_type(&self) -> String {
        self.content_type.clone().unwrap_or_else(|| {
            mime_guess::from_path(&self.name)
                .first_or_octet_stream()
                .essence_str()
                .to_string()
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub name: String,
    pub key: String,
    pub size: u64,
    pub thumbnail_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFailure {
    pub name: String,
    pub error: String,
}

/// Per-file outcome of an upload batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub uploaded: Vec<UploadedFile>,
    pub failed: Vec<UploadFailure>,
}

impl UploadReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct UploadPipeline {
    store: Arc<dyn ObjectStore>,
    transform: Option<Arc<dyn ArtifactTransform>>,
}

impl UploadPipeline {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store, transform: None }
    }

    pub fn with_transform(mut self, transform: Arc<dyn ArtifactTransform>) -> Self {
        self.transform = Some(transform);
        self
    }

    /// Upload `files` into `folder`, one after another.
    ///
    /// Per-file failures are collected in the report. Expired credentials
    /// and cancellation stop the batch.
    pub async fn upload(
        &self,
        root: &NamespaceRoot,
        folder: &FolderPath,
        files: Vec<UploadFile>,
        progress: Option<UploadProgress>,
        cancel: &CancellationToken,
    ) -> DriveResult<UploadReport> {
        if files.is_empty() {
            return Err(DriveError::EmptySelection);
        }

        let mut report = UploadReport::default();
        for file in files {
            if cancel.is_cancelled() {
                return Err(DriveError::Cancelled);
            }

            if let Err(e) = validate_segment(&file.name) {
                report.failed.push(UploadFailure { name: file.name, error: e.to_string() });
                continue;
            }

            let key = full_path(Some(root), folder, &file.name);
            let content_type = file.resolved_content_type();
            let size = file.body.len() as u64;

            // The body moves into the store call; keep a copy only when a thumbnail follows
            let derive_from = match self.transform {
                Some(ref transform) if transform.accepts(&file.name, &content_type) => Some(file.body.clone()),
                _ => None,
            };

            let callback: Option<ProgressCallback> = progress.clone().map(|progress| {
                let name = file.name.clone();
                Box::new(move |loaded: u64, total: u64| progress(&name, loaded, total)) as ProgressCallback
            });

            tracing::info!("[Upload] {} ({} bytes) -> {}", file.name, size, key);
            match self
                .store
                .upload_object(&key, file.body, Some(&content_type), callback)
                .await
            {
                Ok(()) => {}
                Err(StoreError::AuthenticationFailed(msg)) => return Err(DriveError::Auth(msg)),
                Err(e) => {
                    tracing::error!("[Upload] {} failed: {}", file.name, e);
                    report.failed.push(UploadFailure { name: file.name, error: e.to_string() });
                    continue;
                }
            }

            let thumbnail_key = match derive_from {
                Some(body) => self.store_thumbnail(root, folder, &file.name, &body).await,
                None => None,
            };

            report.uploaded.push(UploadedFile {
                name: file.name,
                key,
                size,
                thumbnail_key,
            });
        }

        Ok(report)
    }

    /// Derive and store the thumbnail; failures are logged and ignored
    async fn store_thumbnail(
        &self,
        root: &NamespaceRoot,
        folder: &FolderPath,
        name: &str,
        body: &[u8],
    ) -> Option<String> {
        let transform = self.transform.as_ref()?;
        let artifact = match transform.derive(name, body).await {
            Ok(artifact) => artifact,
            Err(e) => {
                tracing::warn!("[Upload] No thumbnail for {}: {}", name, e);
                return None;
            }
        };

        let key = thumbnail_key(root, &format!("{}{}", folder.as_prefix(), name));
        match self
            .store
            .put_object(&key, artifact.bytes, Some(&artifact.content_type))
            .await
        {
            Ok(()) => Some(key),
            Err(e) => {
                tracing::warn!("[Upload] Storing thumbnail {} failed: {}", key, e);
                None
            }
        }
    }
}
