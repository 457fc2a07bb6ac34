//! Bulk operation engine
//!
//! Recursive delete and recursive archive over key prefixes. Both walk a
//! folder with flat (delimiter-less) paginated listings and process pages
//! strictly one after another. Neither operation is atomic: work already
//! applied stays applied when a later step fails or the caller cancels.

use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::error::{DriveError, DriveResult};
use crate::model::EntryId;
use crate::namespace::SEPARATOR;
use crate::providers::{ListObjectsRequest, ObjectStore, StoreError};

/// Default deflate level for archives
pub const DEFAULT_COMPRESSION_LEVEL: i64 = 6;

/// Formats that gain nothing from deflate; stored as-is
const PRECOMPRESSED_EXTENSIONS: &[&str] = &[
    "zip", "gz", "bz2", "xz", "7z", "rar", "zst", "lz4", "br", "jpg", "jpeg", "png", "gif",
    "webp", "avif", "heic", "heif", "mp3", "mp4", "mkv", "avi", "mov", "flac", "aac", "ogg",
    "opus", "m4a", "m4v", "webm", "pdf", "docx", "xlsx", "pptx", "wasm", "woff", "woff2",
];

/// Check if a file should be compressed based on its extension.
/// Returns false for already-compressed formats (zip, gz, jpg, mp4, etc.)
pub fn should_compress(filename: &str) -> bool {
    let extension = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());

    match extension {
        Some(ext) => !PRECOMPRESSED_EXTENSIONS.contains(&ext.as_str()),
        None => true,
    }
}

/// Outcome of a completed delete
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteReport {
    /// Objects removed, placeholders included
    pub objects: usize,
    /// Listing pages walked
    pub pages: usize,
}

impl DeleteReport {
    fn absorb(&mut self, other: DeleteReport) {
        self.objects += other.objects;
        self.pages += other.pages;
    }
}

/// An object left out of an archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedObject {
    pub key: String,
    pub reason: String,
}

/// Finished in-memory archive
#[derive(Debug, Clone)]
pub struct ArchiveOutput {
    /// Suggested file name, e.g. `docs.zip`
    pub name: String,
    pub bytes: Vec<u8>,
    /// File bodies written into the archive
    pub files: usize,
    pub skipped: Vec<SkippedObject>,
}

impl ArchiveOutput {
    /// Write the archive into `dir` under its suggested name
    pub fn save_to(&self, dir: &Path) -> std::io::Result<PathBuf> {
        let path = dir.join(&self.name);
        std::fs::write(&path, &self.bytes)?;
        Ok(path)
    }
}

/// How a download request is served
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadPlan {
    /// Exactly one file: hand out a signed attachment link
    DirectLink { name: String },
    /// Anything else: build an archive
    Archive { name: String },
}

/// Decide between a direct link and an archive for a selection
pub fn plan_download(entries: &[EntryId]) -> DriveResult<DownloadPlan> {
    match entries {
        [] => Err(DriveError::EmptySelection),
        [single] if !single.is_folder => Ok(DownloadPlan::DirectLink { name: single.name.clone() }),
        [single] => Ok(DownloadPlan::Archive { name: format!("{}.zip", single.name) }),
        _ => Ok(DownloadPlan::Archive { name: "download.zip".to_string() }),
    }
}

fn check_cancelled(cancel: &CancellationToken) -> DriveResult<()> {
    if cancel.is_cancelled() {
        return Err(DriveError::Cancelled);
    }
    Ok(())
}

/// Turn a failure after `done` applied objects into the error the caller sees
fn partial_failure(done: usize, failed: usize, err: DriveError) -> DriveError {
    if err.is_fatal() || matches!(err, DriveError::Cancelled) {
        return err;
    }
    match err {
        DriveError::PartialBulkFailure { succeeded, failed, message } => DriveError::PartialBulkFailure {
            succeeded: done + succeeded,
            failed,
            message,
        },
        err if done == 0 => err,
        err => DriveError::PartialBulkFailure {
            succeeded: done,
            failed,
            message: err.to_string(),
        },
    }
}

pub struct BulkEngine {
    store: Arc<dyn ObjectStore>,
    page_hint: Option<u32>,
    compression_level: i64,
}

impl BulkEngine {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            page_hint: None,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }

    /// Page size hint for the flat listings
    pub fn with_page_hint(mut self, max_keys: Option<u32>) -> Self {
        self.page_hint = max_keys;
        self
    }

    pub fn with_compression_level(mut self, level: i64) -> Self {
        self.compression_level = level.clamp(0, 9);
        self
    }

    /// Delete every object under `prefix`, then its placeholder.
    ///
    /// `prefix` is a full folder prefix ending with the separator. The
    /// placeholder is only removed once every page was deleted.
    pub async fn delete_folder(&self, prefix: &str, cancel: &CancellationToken) -> DriveResult<DeleteReport> {
        tracing::info!("[Bulk] Recursive delete of {}", prefix);
        let mut report = DeleteReport::default();
        let mut token: Option<String> = None;
        let mut placeholder_seen = false;

        loop {
            check_cancelled(cancel)?;

            let request = ListObjectsRequest::recursive(prefix)
                .with_continuation(token.take())
                .with_max_keys(self.page_hint);
            let page = self
                .store
                .list_objects(&request)
                .await
                .map_err(|e| partial_failure(report.objects, 0, e.into()))?;
            report.pages += 1;

            let keys: Vec<String> = page
                .objects
                .iter()
                .map(|o| o.key.clone())
                .filter(|key| {
                    if key == prefix {
                        placeholder_seen = true;
                        false
                    } else {
                        true
                    }
                })
                .collect();

            if !keys.is_empty() {
                let outcome = self
                    .store
                    .delete_objects(&keys)
                    .await
                    .map_err(|e| partial_failure(report.objects, keys.len(), e.into()))?;
                report.objects += outcome.deleted;

                if let Some(first) = outcome.errors.first() {
                    tracing::warn!(
                        "[Bulk] {} key(s) under {} could not be deleted",
                        outcome.errors.len(),
                        prefix
                    );
                    return Err(DriveError::PartialBulkFailure {
                        succeeded: report.objects,
                        failed: outcome.errors.len(),
                        message: format!("Could not delete {}: {} ({})", first.key, first.message, first.code),
                    });
                }
            }

            tracing::debug!("[Bulk] Page {} of {}: {} object(s)", report.pages, prefix, keys.len());
            match page.next_token() {
                Some(next) => token = Some(next.to_string()),
                None => break,
            }
        }

        self.store
            .delete_object(prefix)
            .await
            .map_err(|e| partial_failure(report.objects, 1, e.into()))?;
        if placeholder_seen {
            report.objects += 1;
        }

        tracing::info!("[Bulk] Deleted {} object(s) under {}", report.objects, prefix);
        Ok(report)
    }

    /// Delete files and folders of one parent folder, one after another
    pub async fn delete_entries(
        &self,
        parent_prefix: &str,
        entries: &[EntryId],
        cancel: &CancellationToken,
    ) -> DriveResult<DeleteReport> {
        if entries.is_empty() {
            return Err(DriveError::EmptySelection);
        }

        let mut report = DeleteReport::default();
        for entry in entries {
            check_cancelled(cancel)?;

            if entry.is_folder {
                let prefix = format!("{}{}{}", parent_prefix, entry.name, SEPARATOR);
                let folder = self
                    .delete_folder(&prefix, cancel)
                    .await
                    .map_err(|e| partial_failure(report.objects, 1, e))?;
                report.absorb(folder);
            } else {
                let key = format!("{}{}", parent_prefix, entry.name);
                self.store
                    .delete_object(&key)
                    .await
                    .map_err(|e| partial_failure(report.objects, 1, e.into()))?;
                report.objects += 1;
            }
        }

        Ok(report)
    }

    /// Every key under `prefix`, across all pages
    async fn enumerate(&self, prefix: &str, cancel: &CancellationToken) -> DriveResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut token: Option<String> = None;
        loop {
            check_cancelled(cancel)?;
            let request = ListObjectsRequest::recursive(prefix)
                .with_continuation(token.take())
                .with_max_keys(self.page_hint);
            let page = self.store.list_objects(&request).await?;
            keys.extend(page.objects.iter().map(|o| o.key.clone()));
            match page.next_token() {
                Some(next) => token = Some(next.to_string()),
                None => return Ok(keys),
            }
        }
    }

    fn file_options(&self, name: &str) -> SimpleFileOptions {
        if self.compression_level == 0 || !should_compress(name) {
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored)
        } else {
            SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Deflated)
                .compression_level(Some(self.compression_level))
        }
    }

    /// Fetch one body into the archive, recording it as skipped on failure
    async fn add_object(
        &self,
        zip: &mut ZipWriter<Cursor<Vec<u8>>>,
        key: &str,
        entry_name: &str,
        output: &mut ArchiveOutput,
    ) -> DriveResult<()> {
        let body = match self.store.get_object(key).await {
            Ok(body) => body,
            Err(StoreError::AuthenticationFailed(msg)) => return Err(DriveError::Auth(msg)),
            Err(e) => {
                tracing::warn!("[Bulk] Skipping {} in archive: {}", key, e);
                output.skipped.push(SkippedObject { key: key.to_string(), reason: e.to_string() });
                return Ok(());
            }
        };

        zip.start_file(entry_name.to_string(), self.file_options(entry_name))?;
        zip.write_all(&body)?;
        output.files += 1;
        Ok(())
    }

    /// Build a zip of the selected entries of one parent folder.
    ///
    /// Folder contents keep their path relative to the parent, so a selected
    /// folder `docs` yields entries `docs/...`. `on_progress` receives
    /// `(completed_items, total_items)` per selected entry.
    pub async fn archive(
        &self,
        parent_prefix: &str,
        entries: &[EntryId],
        cancel: &CancellationToken,
        on_progress: &(dyn Fn(usize, usize) + Send + Sync),
    ) -> DriveResult<ArchiveOutput> {
        let name = match plan_download(entries)? {
            DownloadPlan::Archive { name } => name,
            DownloadPlan::DirectLink { name } => format!("{}.zip", name),
        };
        tracing::info!("[Bulk] Archiving {} item(s) from {} into {}", entries.len(), parent_prefix, name);

        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let mut output = ArchiveOutput {
            name,
            bytes: Vec::new(),
            files: 0,
            skipped: Vec::new(),
        };
        let total = entries.len();

        for (index, entry) in entries.iter().enumerate() {
            check_cancelled(cancel)?;

            if entry.is_folder {
                let prefix = format!("{}{}{}", parent_prefix, entry.name, SEPARATOR);
                let dir_options = SimpleFileOptions::default();
                zip.add_directory(format!("{}{}", entry.name, SEPARATOR), dir_options)?;

                for key in self.enumerate(&prefix, cancel).await? {
                    check_cancelled(cancel)?;
                    let Some(relative) = key.strip_prefix(parent_prefix) else { continue };
                    if key == prefix {
                        continue;
                    }
                    if relative.ends_with(SEPARATOR) {
                        zip.add_directory(relative.to_string(), dir_options)?;
                    } else {
                        self.add_object(&mut zip, &key, relative, &mut output).await?;
                    }
                }
            } else {
                let key = format!("{}{}", parent_prefix, entry.name);
                self.add_object(&mut zip, &key, &entry.name, &mut output).await?;
            }

            on_progress(index + 1, total);
        }

        if output.files == 0 {
            return Err(DriveError::NoOp(format!(
                "Nothing to archive: {} object(s) could not be downloaded",
                output.skipped.len()
            )));
        }

        output.bytes = zip.finish()?.into_inner();
        tracing::info!(
            "[Bulk] Archive {} ready: {} file(s), {} skipped, {} bytes",
            output.name,
            output.files,
            output.skipped.len(),
            output.bytes.len()
        );
        Ok(output)
    }
}
