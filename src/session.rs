//! Drive Session - per sign-in context
//!
//! A `DriveSession` is created at sign-in and torn down at sign-out. It owns
//! the namespace root, the current folder and selection, the signed-URL cache
//! and the engines that act on the store, and is the API front ends call.
//!
//! Every externally triggered operation reports its failure through exactly
//! one error `Notification`; creating folders, uploading and deleting also
//! report success.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bulk::{plan_download, ArchiveOutput, BulkEngine, DeleteReport, DownloadPlan};
use crate::config::{validate_config, DriveConfig, LinkTtls};
use crate::error::{DriveError, DriveResult};
use crate::events::{
    DriveEvent, EventSink, Notification, TransferDirection, TransferEvent, TransferEventType,
    TransferProgress,
};
use crate::identity::{Identity, IdentityProvider};
use crate::listing::{ListOutcome, ListingController};
use crate::model::{EntryId, Listing};
use crate::namespace::{
    folder_prefix, full_path, validate_segment, Breadcrumb, FolderPath, NamespaceRoot, SEPARATOR,
};
use crate::providers::{ObjectStore, PresignRequest, S3Provider};
use crate::selection::Selection;
use crate::signed_urls::{LinkMode, SignedUrlCache};
use crate::thumbnail::ArtifactTransform;
use crate::upload::{
    thumbnail_folder_prefix, thumbnail_key, UploadFile, UploadPipeline, UploadProgress, UploadReport,
    THUMBNAIL_FOLDER,
};

/// Tunables of a session
#[derive(Clone, Default)]
pub struct SessionOptions {
    pub links: LinkTtls,
    pub page_hint: Option<u32>,
    pub compression_level: Option<i64>,
    pub thumbnailer: Option<Arc<dyn ArtifactTransform>>,
}

impl SessionOptions {
    pub fn from_config(config: &DriveConfig) -> Self {
        Self {
            links: config.links,
            page_hint: config.list_page_size,
            compression_level: Some(config.compression_level),
            thumbnailer: config
                .thumbnails
                .thumbnailer()
                .map(|t| Arc::new(t) as Arc<dyn ArtifactTransform>),
        }
    }
}

/// Result of a download request
#[derive(Debug, Clone)]
pub enum DownloadOutcome {
    /// A single file, served by a signed attachment link
    Link { name: String, url: String },
    /// Several items (or a folder) packed into an archive
    Archive(ArchiveOutput),
}

struct NavState {
    path: FolderPath,
    selection: Selection,
}

pub struct DriveSession {
    store: Arc<dyn ObjectStore>,
    identity: RwLock<Option<Identity>>,
    nav: Mutex<NavState>,
    listing: ListingController,
    bulk: BulkEngine,
    uploads: UploadPipeline,
    links: SignedUrlCache,
    ttls: LinkTtls,
    events: Arc<dyn EventSink>,
    cancel: Mutex<CancellationToken>,
    transfer_seq: AtomicU64,
}

impl DriveSession {
    /// Start a session for a signed-in identity
    pub fn new(
        identity: Identity,
        store: Arc<dyn ObjectStore>,
        options: SessionOptions,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let listing = ListingController::new(store.clone())
            .with_hidden(identity.root.prefix(), THUMBNAIL_FOLDER)
            .with_page_hint(options.page_hint);

        let mut bulk = BulkEngine::new(store.clone()).with_page_hint(options.page_hint);
        if let Some(level) = options.compression_level {
            bulk = bulk.with_compression_level(level);
        }

        let mut uploads = UploadPipeline::new(store.clone());
        if let Some(thumbnailer) = options.thumbnailer {
            uploads = uploads.with_transform(thumbnailer);
        }

        info!("[Session] Signed in as {} on {}", identity.root, store.display_name());

        Self {
            store,
            identity: RwLock::new(Some(identity)),
            nav: Mutex::new(NavState {
                path: FolderPath::root(),
                selection: Selection::new(),
            }),
            listing,
            bulk,
            uploads,
            links: SignedUrlCache::new(options.links.safety_margin_secs),
            ttls: options.links,
            events,
            cancel: Mutex::new(CancellationToken::new()),
            transfer_seq: AtomicU64::new(0),
        }
    }

    /// Sign in with `provider` and connect to the configured S3 bucket
    pub async fn connect(
        config: &DriveConfig,
        provider: &dyn IdentityProvider,
        events: Arc<dyn EventSink>,
    ) -> DriveResult<Self> {
        let result: DriveResult<Self> = async {
            validate_config(config)?;
            info!("[Session] Signing in with {} identity", provider.name());
            let identity = provider.sign_in().await?;
            let store = Arc::new(S3Provider::new(config.s3_config(&identity.credentials))?);
            Ok(Self::new(identity, store, SessionOptions::from_config(config), events.clone()))
        }
        .await;

        if let Err(ref e) = result {
            events.emit(DriveEvent::Notification(Notification::error(e.to_string())));
        }
        result
    }

    fn nav(&self) -> std::sync::MutexGuard<'_, NavState> {
        self.nav.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn notify(&self, notification: Notification) {
        self.events.emit(DriveEvent::Notification(notification));
    }

    /// Emit one notification for the outcome of an operation
    fn report<T>(&self, result: DriveResult<T>, success: impl FnOnce(&T) -> Option<String>) -> DriveResult<T> {
        match &result {
            Ok(value) => {
                if let Some(message) = success(value) {
                    self.notify(Notification::success(message));
                }
            }
            Err(e) => {
                warn!("[Session] {}", e);
                self.notify(Notification::error(e.to_string()));
            }
        }
        result
    }

    fn next_transfer_id(&self, kind: &str) -> String {
        format!("{}-{}", kind, self.transfer_seq.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn cancel_token(&self) -> CancellationToken {
        self.cancel.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Namespace root of a signed-in session with usable credentials
    async fn active_root(&self) -> DriveResult<NamespaceRoot> {
        match self.identity.read().await.as_ref() {
            None => Err(DriveError::Auth("Not signed in".to_string())),
            Some(identity) if identity.credentials.is_expired() => {
                Err(DriveError::Auth("Session credentials expired, sign in again".to_string()))
            }
            Some(identity) => Ok(identity.root.clone()),
        }
    }

    pub async fn root(&self) -> Option<NamespaceRoot> {
        self.identity.read().await.as_ref().map(|i| i.root.clone())
    }

    pub fn current_path(&self) -> FolderPath {
        self.nav().path.clone()
    }

    pub fn breadcrumbs(&self) -> Vec<Breadcrumb> {
        self.nav().path.breadcrumbs()
    }

    /// Last applied listing
    pub fn view(&self) -> Option<Listing> {
        self.listing.view()
    }

    // ============ Listing & navigation ============

    /// List the current folder
    pub async fn list(&self) -> DriveResult<ListOutcome> {
        let result = self.list_current().await;
        self.report(result, |_| None)
    }

    async fn list_current(&self) -> DriveResult<ListOutcome> {
        let root = self.active_root().await?;
        let path = self.current_path();
        let prefix = folder_prefix(&root, &path);

        let token = self.listing.issue();
        let result = self.listing.fetch(&prefix).await;
        let outcome = self.listing.apply(token, result)?;

        if let ListOutcome::Applied(ref listing) = outcome {
            let mut nav = self.nav();
            if nav.path == path {
                nav.selection.reconcile(listing);
            }
        }
        Ok(outcome)
    }

    /// Move to `path`, clear the selection and list it
    pub async fn navigate(&self, path: FolderPath) -> DriveResult<ListOutcome> {
        {
            let mut nav = self.nav();
            nav.path = path;
            nav.selection.clear();
        }
        self.list().await
    }

    pub async fn enter_folder(&self, name: &str) -> DriveResult<ListOutcome> {
        let path = self.report(self.current_path().child(name), |_| None)?;
        self.navigate(path).await
    }

    /// Jump to the breadcrumb at `depth` (0 is the root)
    pub async fn jump_to(&self, depth: usize) -> DriveResult<ListOutcome> {
        let mut path = self.current_path();
        path.truncate(depth);
        self.navigate(path).await
    }

    pub async fn go_up(&self) -> DriveResult<ListOutcome> {
        let path = self.current_path().parent().unwrap_or_default();
        self.navigate(path).await
    }

    // ============ Selection ============

    pub fn toggle_select(&self, id: EntryId) -> bool {
        self.nav().selection.toggle(id)
    }

    /// Select every entry of the current view
    pub fn select_all(&self) {
        if let Some(view) = self.listing.view() {
            self.nav().selection.select_all(&view);
        }
    }

    pub fn clear_selection(&self) {
        self.nav().selection.clear();
    }

    pub fn selection(&self) -> Vec<EntryId> {
        self.nav().selection.ids()
    }

    // ============ Mutations ============

    /// Create an empty folder (placeholder object) in the current folder
    pub async fn create_folder(&self, name: &str) -> DriveResult<()> {
        let result: DriveResult<()> = async {
            validate_segment(name)?;
            let root = self.active_root().await?;
            let key = full_path(Some(&root), &self.current_path(), &format!("{}{}", name, SEPARATOR));
            self.store.put_object(&key, Vec::new(), None).await?;
            info!("[Session] Created folder {}", key);
            Ok(())
        }
        .await;
        self.report(result, |_| Some(format!("Folder '{}' created", name)))
    }

    /// Delete files and folders of the current folder
    pub async fn delete_entries(&self, entries: Vec<EntryId>) -> DriveResult<DeleteReport> {
        let result = self.delete_entries_inner(&entries).await;
        self.report(result, |report| {
            Some(format!("Deleted {} item(s) ({} objects)", entries.len(), report.objects))
        })
    }

    pub async fn delete_selection(&self) -> DriveResult<DeleteReport> {
        self.delete_entries(self.selection()).await
    }

    async fn delete_entries_inner(&self, entries: &[EntryId]) -> DriveResult<DeleteReport> {
        let root = self.active_root().await?;
        let path = self.current_path();
        let parent = folder_prefix(&root, &path);
        let cancel = self.cancel_token();

        let result = self.bulk.delete_entries(&parent, entries, &cancel).await;

        // Links to anything that may be gone must not be served again
        for entry in entries {
            if entry.is_folder {
                self.links.invalidate_prefix(&format!("{}{}{}", parent, entry.name, SEPARATOR));
            } else {
                self.links.invalidate(&format!("{}{}", parent, entry.name));
            }
        }
        let report = result?;

        {
            let mut nav = self.nav();
            for entry in entries {
                nav.selection.remove(entry);
            }
        }

        self.remove_thumbnails(&root, &path, entries, &cancel).await;
        Ok(report)
    }

    /// Drop derived thumbnails of deleted entries; failures are only logged
    async fn remove_thumbnails(
        &self,
        root: &NamespaceRoot,
        path: &FolderPath,
        entries: &[EntryId],
        cancel: &CancellationToken,
    ) {
        for entry in entries {
            let relative = format!("{}{}", path.as_prefix(), entry.name);
            let outcome = if entry.is_folder {
                let prefix = thumbnail_folder_prefix(root, &relative);
                self.links.invalidate_prefix(&prefix);
                self.bulk.delete_folder(&prefix, cancel).await.map(|_| ())
            } else {
                let key = thumbnail_key(root, &relative);
                self.links.invalidate(&key);
                self.store.delete_object(&key).await.map_err(DriveError::from)
            };
            if let Err(e) = outcome {
                warn!("[Session] Thumbnail cleanup for {} failed: {}", relative, e);
            }
        }
    }

    /// Upload files into the current folder.
    ///
    /// Per-file failures do not fail the call; they are listed in the report
    /// and announced by a single error notification.
    pub async fn upload(
        &self,
        files: Vec<UploadFile>,
        progress: Option<UploadProgress>,
    ) -> DriveResult<UploadReport> {
        let total_files = files.len();
        let result = self.upload_inner(files, progress).await;

        if let Ok(ref report) = result {
            if !report.is_complete() {
                let failed: Vec<String> = report
                    .failed
                    .iter()
                    .map(|f| format!("{} ({})", f.name, f.error))
                    .collect();
                self.notify(Notification::error(format!(
                    "Uploaded {} of {} file(s); failed: {}",
                    report.uploaded.len(),
                    total_files,
                    failed.join(", ")
                )));
                return result;
            }
        }
        self.report(result, |report| Some(format!("Uploaded {} file(s)", report.uploaded.len())))
    }

    async fn upload_inner(
        &self,
        files: Vec<UploadFile>,
        progress: Option<UploadProgress>,
    ) -> DriveResult<UploadReport> {
        let root = self.active_root().await?;
        let path = self.current_path();
        let cancel = self.cancel_token();
        let transfer_id = self.next_transfer_id("upload");

        let events = self.events.clone();
        let id = transfer_id.clone();
        let forward: UploadProgress = Arc::new(move |name: &str, loaded: u64, total: u64| {
            events.emit(DriveEvent::Transfer(TransferEvent::progress(TransferProgress::new(
                &id,
                name,
                loaded,
                total,
                TransferDirection::Upload,
            ))));
            if let Some(ref progress) = progress {
                progress(name, loaded, total);
            }
        });

        let label = path.to_string();
        self.emit_transfer(TransferEventType::Start, &transfer_id, &label, TransferDirection::Upload, None);
        let result = self.uploads.upload(&root, &path, files, Some(forward), &cancel).await;
        self.finish_transfer(&result, &transfer_id, &label, TransferDirection::Upload);
        result
    }

    fn emit_transfer(
        &self,
        event_type: TransferEventType,
        transfer_id: &str,
        filename: &str,
        direction: TransferDirection,
        message: Option<String>,
    ) {
        let event = TransferEvent::new(event_type, transfer_id, filename, direction);
        let event = match message {
            Some(message) => event.with_message(message),
            None => event,
        };
        self.events.emit(DriveEvent::Transfer(event));
    }

    fn finish_transfer<T>(&self, result: &DriveResult<T>, transfer_id: &str, filename: &str, direction: TransferDirection) {
        match result {
            Ok(_) => self.emit_transfer(TransferEventType::Complete, transfer_id, filename, direction, None),
            Err(DriveError::Cancelled) => {
                self.emit_transfer(TransferEventType::Cancelled, transfer_id, filename, direction, None)
            }
            Err(e) => self.emit_transfer(TransferEventType::Error, transfer_id, filename, direction, Some(e.to_string())),
        }
    }

    // ============ Downloads & links ============

    /// Serve a download: one file as a direct link, anything else as an archive.
    ///
    /// Bodies that could not be fetched are left out of the archive and
    /// announced by a single error notification.
    pub async fn archive_and_download(&self, entries: Vec<EntryId>) -> DriveResult<DownloadOutcome> {
        let result = self.archive_inner(&entries).await;

        if let Ok(DownloadOutcome::Archive(ref output)) = result {
            if !output.skipped.is_empty() {
                let failed: Vec<String> = output
                    .skipped
                    .iter()
                    .map(|s| format!("{} ({})", s.key, s.reason))
                    .collect();
                warn!("[Session] Archive {} incomplete: {} object(s) skipped", output.name, failed.len());
                self.notify(Notification::error(format!(
                    "Archived {} file(s); {} failed: {}",
                    output.files,
                    failed.len(),
                    failed.join(", ")
                )));
                return result;
            }
        }
        self.report(result, |_| None)
    }

    pub async fn download_selection(&self) -> DriveResult<DownloadOutcome> {
        self.archive_and_download(self.selection()).await
    }

    async fn archive_inner(&self, entries: &[EntryId]) -> DriveResult<DownloadOutcome> {
        let root = self.active_root().await?;
        let path = self.current_path();

        let name = match plan_download(entries)? {
            DownloadPlan::DirectLink { name } => {
                let key = full_path(Some(&root), &path, &name);
                let url = self.mint_link(&key, &name, LinkMode::Attachment).await?;
                return Ok(DownloadOutcome::Link { name, url });
            }
            DownloadPlan::Archive { name } => name,
        };

        let cancel = self.cancel_token();
        let transfer_id = self.next_transfer_id("archive");
        let events = self.events.clone();
        let progress = |done: usize, total: usize| {
            events.emit(DriveEvent::Transfer(TransferEvent::progress(TransferProgress::new(
                &transfer_id,
                &name,
                done as u64,
                total as u64,
                TransferDirection::Archive,
            ))));
        };

        self.emit_transfer(TransferEventType::Start, &transfer_id, &name, TransferDirection::Archive, None);
        let result = self
            .bulk
            .archive(&folder_prefix(&root, &path), entries, &cancel, &progress)
            .await;
        self.finish_transfer(&result, &transfer_id, &name, TransferDirection::Archive);
        Ok(DownloadOutcome::Archive(result?))
    }

    /// Signed link to a file of the current folder
    pub async fn resolve_link(&self, entry: &EntryId, mode: LinkMode) -> DriveResult<String> {
        let result: DriveResult<String> = async {
            if entry.is_folder {
                return Err(DriveError::NoOp(format!("'{}' is a folder and has no link", entry.name)));
            }
            let root = self.active_root().await?;
            let key = full_path(Some(&root), &self.current_path(), &entry.name);
            self.mint_link(&key, &entry.name, mode).await
        }
        .await;
        self.report(result, |_| None)
    }

    async fn mint_link(&self, key: &str, name: &str, mode: LinkMode) -> DriveResult<String> {
        match mode {
            LinkMode::Inline => Ok(self
                .links
                .get_or_create(self.store.as_ref(), key, self.ttls.inline_secs)
                .await?),
            LinkMode::Attachment => {
                let mut request = PresignRequest::get(key, self.ttls.attachment_secs);
                if let Some(disposition) = mode.disposition(name) {
                    request = request.with_disposition(disposition);
                }
                Ok(self.store.presign(&request).await?)
            }
        }
    }

    /// Cached preview link for the thumbnail of a file in the current folder
    pub async fn thumbnail_link(&self, name: &str) -> DriveResult<String> {
        let result: DriveResult<String> = async {
            let root = self.active_root().await?;
            let relative = format!("{}{}", self.current_path().as_prefix(), name);
            let key = thumbnail_key(&root, &relative);
            Ok(self
                .links
                .get_or_create(self.store.as_ref(), &key, self.ttls.preview_secs)
                .await?)
        }
        .await;
        self.report(result, |_| None)
    }

    // ============ Lifecycle ============

    /// Abort running bulk operations and uploads
    pub fn cancel_operations(&self) {
        let mut cancel = self.cancel.lock().unwrap_or_else(|e| e.into_inner());
        cancel.cancel();
        *cancel = CancellationToken::new();
    }

    /// Tear the session down: forget the identity, links, view and selection
    pub async fn sign_out(&self) {
        self.cancel_operations();
        let previous = self.identity.write().await.take();
        self.links.clear();
        self.listing.reset();
        {
            let mut nav = self.nav();
            nav.path = FolderPath::root();
            nav.selection.clear();
        }
        if let Some(identity) = previous {
            info!("[Session] Signed out {}", identity.root);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::TemporaryCredentials;
    use crate::providers::MemoryStore;
    use crate::events::NotificationLevel;
    use crate::test_support::{seeded_store, Faults, FaultyStore};
    use crate::thumbnail::{Artifact, TransformError};
    use async_trait::async_trait;
    use secrecy::SecretString;
    use std::io::{Cursor, Read};
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    fn identity(root: &str) -> Identity {
        Identity {
            root: NamespaceRoot::new(root).unwrap(),
            credentials: TemporaryCredentials {
                access_key_id: "AKID".into(),
                secret_access_key: SecretString::from("secret".to_string()),
                session_token: None,
                expires_at: None,
            },
        }
    }

    fn session_with(store: Arc<dyn ObjectStore>, options: SessionOptions) -> (DriveSession, UnboundedReceiver<DriveEvent>) {
        let (tx, rx) = unbounded_channel();
        (DriveSession::new(identity("alice"), store, options, Arc::new(tx)), rx)
    }

    fn session(store: Arc<dyn ObjectStore>) -> (DriveSession, UnboundedReceiver<DriveEvent>) {
        session_with(store, SessionOptions::default())
    }

    fn notifications(rx: &mut UnboundedReceiver<DriveEvent>) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let DriveEvent::Notification(n) = event {
                out.push(n);
            }
        }
        out
    }

    fn applied(outcome: ListOutcome) -> Listing {
        match outcome {
            ListOutcome::Applied(listing) => listing,
            ListOutcome::Discarded => panic!("listing was discarded"),
        }
    }

    struct StubThumbnailer;

    #[async_trait]
    impl ArtifactTransform for StubThumbnailer {
        fn accepts(&self, _name: &str, content_type: &str) -> bool {
            content_type.starts_with("image/")
        }

        async fn derive(&self, _name: &str, _body: &[u8]) -> Result<Artifact, TransformError> {
            Ok(Artifact { bytes: b"jpeg".to_vec(), content_type: "image/jpeg".into() })
        }
    }

    #[tokio::test]
    async fn test_alice_docs_example() {
        let store = Arc::new(MemoryStore::new("drive"));
        store.insert("alice/docs/a.txt", vec![0u8; 10]);
        store.insert("alice/docs/sub/b.txt", vec![0u8; 5]);
        store.insert("bob/docs/private.txt", vec![0u8; 1]);
        let (session, _rx) = session(store);

        let root = applied(session.list().await.unwrap());
        assert_eq!(root.folders, vec!["docs"]);
        assert!(root.files.is_empty());

        let docs = applied(session.enter_folder("docs").await.unwrap());
        assert_eq!(docs.folders, vec!["sub"]);
        assert_eq!(docs.files.len(), 1);
        assert_eq!(docs.files[0].name, "a.txt");
        assert_eq!(docs.files[0].size, 10);

        let crumbs: Vec<_> = session.breadcrumbs().into_iter().map(|c| c.label).collect();
        assert_eq!(crumbs, vec!["My Drive", "docs"]);
        applied(session.go_up().await.unwrap());
        assert!(session.current_path().is_root());
    }

    #[tokio::test]
    async fn test_navigation_clears_selection() {
        let store = seeded_store(&["alice/a.txt", "alice/docs/x.pdf", "alice/b.txt"], 1000);
        let (session, _rx) = session(store);
        session.list().await.unwrap();
        session.select_all();
        assert_eq!(session.selection().len(), 3);

        session.enter_folder("docs").await.unwrap();
        assert!(session.selection().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_reconciles_selection() {
        let store = seeded_store(&["alice/a.txt", "alice/b.txt"], 1000);
        let (session, _rx) = session(store.clone());
        session.list().await.unwrap();
        session.toggle_select(EntryId::file("a.txt"));
        session.toggle_select(EntryId::file("b.txt"));

        store.delete_object("alice/a.txt").await.unwrap();
        session.list().await.unwrap();
        assert_eq!(session.selection(), vec![EntryId::file("b.txt")]);
    }

    #[tokio::test]
    async fn test_thumbnail_folder_is_hidden_at_root_only() {
        let store = seeded_store(&["alice/.thumbnails/a.png.jpg", "alice/a.png", "alice/docs/.thumbnails/x"], 1000);
        let (session, _rx) = session(store);
        let root = applied(session.list().await.unwrap());
        assert_eq!(root.folders, vec!["docs"]);
        let docs = applied(session.enter_folder("docs").await.unwrap());
        assert_eq!(docs.folders, vec![".thumbnails"]);
    }

    #[tokio::test]
    async fn test_create_folder() {
        let store = Arc::new(MemoryStore::new("drive"));
        let (session, mut rx) = session(store.clone());
        session.create_folder("reports").await.unwrap();
        assert!(store.contains("alice/reports/"));

        let listing = applied(session.list().await.unwrap());
        assert_eq!(listing.folders, vec!["reports"]);
        assert_eq!(notifications(&mut rx), vec![Notification::success("Folder 'reports' created")]);

        let err = session.create_folder("a/b").await.unwrap_err();
        assert!(matches!(err, DriveError::InvalidName(_)));
        let notes = notifications(&mut rx);
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].level, crate::events::NotificationLevel::Error);
    }

    #[tokio::test]
    async fn test_delete_selection_across_pages() {
        let store = MemoryStore::new("drive").with_page_size(1000);
        store.insert("alice/big/", Vec::new());
        for i in 0..1500 {
            store.insert(format!("alice/big/{:04}.txt", i), b"x".to_vec());
        }
        store.insert("alice/a.txt", b"a".to_vec());
        store.insert("alice/keep.txt", b"k".to_vec());
        let store = Arc::new(store);
        let (session, mut rx) = session(store.clone());

        session.list().await.unwrap();
        let link = session.resolve_link(&EntryId::file("a.txt"), LinkMode::Inline).await.unwrap();
        session.toggle_select(EntryId::folder("big"));
        session.toggle_select(EntryId::file("a.txt"));

        let report = session.delete_selection().await.unwrap();
        assert_eq!(report.objects, 1502);
        assert!(session.selection().is_empty());

        let listing = applied(session.list().await.unwrap());
        assert!(listing.folders.is_empty());
        assert_eq!(listing.files.len(), 1);

        let big = session.bulk.delete_folder("alice/big/", &CancellationToken::new()).await.unwrap();
        assert_eq!(big.objects, 0);

        // The cached inline link was dropped with the file
        store.insert("alice/a.txt", b"again".to_vec());
        let fresh = session.resolve_link(&EntryId::file("a.txt"), LinkMode::Inline).await.unwrap();
        assert_ne!(link, fresh);

        let notes = notifications(&mut rx);
        assert_eq!(notes, vec![Notification::success("Deleted 2 item(s) (1502 objects)")]);
    }

    #[tokio::test]
    async fn test_delete_nothing_selected() {
        let (session, mut rx) = session(Arc::new(MemoryStore::new("drive")));
        let err = session.delete_selection().await.unwrap_err();
        assert!(matches!(err, DriveError::EmptySelection));
        assert_eq!(notifications(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn test_archive_two_folders_and_a_file() {
        let store = seeded_store(
            &[
                "alice/photos/",
                "alice/photos/2023/beach.jpg",
                "alice/photos/cat.png",
                "alice/docs/cv.docx",
                "alice/todo.txt",
                "alice/ignored.txt",
            ],
            2,
        );
        let (session, _rx) = session(store);
        let outcome = session
            .archive_and_download(vec![
                EntryId::folder("photos"),
                EntryId::folder("docs"),
                EntryId::file("todo.txt"),
            ])
            .await
            .unwrap();

        let DownloadOutcome::Archive(output) = outcome else { panic!("expected an archive") };
        let mut archive = zip::ZipArchive::new(Cursor::new(output.bytes)).unwrap();
        let mut files = Vec::new();
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i).unwrap();
            if entry.is_dir() {
                continue;
            }
            let mut body = String::new();
            entry.read_to_string(&mut body).unwrap();
            files.push((entry.name().to_string(), body));
        }
        files.sort();
        assert_eq!(
            files,
            vec![
                ("docs/cv.docx".to_string(), "alice/docs/cv.docx".to_string()),
                ("photos/2023/beach.jpg".to_string(), "alice/photos/2023/beach.jpg".to_string()),
                ("photos/cat.png".to_string(), "alice/photos/cat.png".to_string()),
                ("todo.txt".to_string(), "alice/todo.txt".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_archive_with_failed_bodies_notifies_once() {
        let mut fail = std::collections::HashSet::new();
        fail.insert("alice/docs/x.pdf".to_string());
        let store = Arc::new(
            FaultyStore::new(seeded_store(&["alice/docs/x.pdf", "alice/docs/y.txt"], 1000))
                .with_faults(Faults { fail_get_keys: fail, ..Default::default() }),
        );
        let (session, mut rx) = session(store);
        let outcome = session.archive_and_download(vec![EntryId::folder("docs")]).await.unwrap();

        let DownloadOutcome::Archive(output) = outcome else { panic!("expected an archive") };
        assert_eq!(output.files, 1);
        assert_eq!(output.skipped.len(), 1);

        let notes = notifications(&mut rx);
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].level, NotificationLevel::Error);
        assert!(notes[0].message.starts_with("Archived 1 file(s); 1 failed: alice/docs/x.pdf"));
    }

    #[tokio::test]
    async fn test_single_file_download_is_a_link() {
        let store = seeded_store(&["alice/docs/report final.pdf"], 1000);
        let (session, _rx) = session(store);
        session.enter_folder("docs").await.unwrap();

        let outcome = session
            .archive_and_download(vec![EntryId::file("report final.pdf")])
            .await
            .unwrap();
        match outcome {
            DownloadOutcome::Link { name, url } => {
                assert_eq!(name, "report final.pdf");
                assert!(url.starts_with("memory://drive/alice/docs/report final.pdf?"));
                assert!(url.contains("expires="));
                assert!(url.contains("response-content-disposition=attachment"));
            }
            DownloadOutcome::Archive(_) => panic!("single file should not be archived"),
        }
    }

    #[tokio::test]
    async fn test_links_inline_cached_attachment_fresh() {
        let store = Arc::new(FaultyStore::new(seeded_store(&["alice/a.txt"], 1000)));
        let (session, _rx) = session(store.clone());
        let id = EntryId::file("a.txt");

        let first = session.resolve_link(&id, LinkMode::Inline).await.unwrap();
        let second = session.resolve_link(&id, LinkMode::Inline).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.presigns(), 1);

        let a = session.resolve_link(&id, LinkMode::Attachment).await.unwrap();
        let b = session.resolve_link(&id, LinkMode::Attachment).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(store.presigns(), 3);

        assert!(matches!(
            session.resolve_link(&EntryId::folder("docs"), LinkMode::Inline).await,
            Err(DriveError::NoOp(_))
        ));
    }

    #[tokio::test]
    async fn test_upload_with_thumbnail_and_events() {
        let store = seeded_store(&["alice/docs/"], 1000);
        let options = SessionOptions {
            thumbnailer: Some(Arc::new(StubThumbnailer)),
            ..Default::default()
        };
        let (session, mut rx) = session_with(store.clone(), options);
        session.enter_folder("docs").await.unwrap();

        let report = session
            .upload(vec![UploadFile::new("cat.png", vec![1u8; 64])], None)
            .await
            .unwrap();
        assert!(report.is_complete());
        assert!(store.contains("alice/docs/cat.png"));
        assert!(store.contains("alice/.thumbnails/docs/cat.png.jpg"));

        let link = session.thumbnail_link("cat.png").await.unwrap();
        assert!(link.starts_with("memory://drive/alice/.thumbnails/docs/cat.png.jpg"));

        let mut kinds = Vec::new();
        let mut notes = Vec::new();
        while let Ok(event) = rx.try_recv() {
            match event {
                DriveEvent::Transfer(t) => kinds.push(t.event_type),
                DriveEvent::Notification(n) => notes.push(n),
            }
        }
        assert_eq!(
            kinds,
            vec![TransferEventType::Start, TransferEventType::Progress, TransferEventType::Complete]
        );
        assert_eq!(notes, vec![Notification::success("Uploaded 1 file(s)")]);

        // Deleting the file also drops its thumbnail
        session.delete_entries(vec![EntryId::file("cat.png")]).await.unwrap();
        assert!(!store.contains("alice/.thumbnails/docs/cat.png.jpg"));
    }

    #[tokio::test]
    async fn test_upload_partial_failure_notifies_once() {
        let mut fail = std::collections::HashSet::new();
        fail.insert("alice/b.txt".to_string());
        let store = Arc::new(
            FaultyStore::new(Arc::new(MemoryStore::new("drive")))
                .with_faults(Faults { fail_put_keys: fail, ..Default::default() }),
        );
        let (session, mut rx) = session(store);
        let report = session
            .upload(
                vec![UploadFile::new("a.txt", b"a".to_vec()), UploadFile::new("b.txt", b"b".to_vec())],
                None,
            )
            .await
            .unwrap();
        assert_eq!(report.failed.len(), 1);

        let notes = notifications(&mut rx);
        assert_eq!(notes.len(), 1);
        assert!(notes[0].message.starts_with("Uploaded 1 of 2 file(s); failed: b.txt"));
    }

    #[tokio::test]
    async fn test_listing_failure_keeps_view() {
        let store = Arc::new(
            FaultyStore::new(seeded_store(&["alice/a.txt", "alice/docs/x.pdf"], 1000)).with_faults(Faults {
                fail_list_call: Some(1),
                ..Default::default()
            }),
        );
        let (session, mut rx) = session(store);
        session.list().await.unwrap();

        assert!(session.enter_folder("docs").await.is_err());
        assert_eq!(session.view().unwrap().prefix, "alice/");
        let notes = notifications(&mut rx);
        assert_eq!(notes.len(), 1);
        assert!(notes[0].message.contains("connection reset"));
    }

    #[tokio::test]
    async fn test_expired_store_credentials_are_fatal() {
        let store = Arc::new(
            FaultyStore::new(Arc::new(MemoryStore::new("drive")))
                .with_faults(Faults { expired: true, ..Default::default() }),
        );
        let (session, _rx) = session(store);
        let err = session.list().await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_expired_session_credentials_are_fatal() {
        let mut expired = identity("alice");
        expired.credentials.expires_at = Some(chrono::Utc::now());
        let (tx, _rx) = unbounded_channel();
        let session = DriveSession::new(
            expired,
            Arc::new(MemoryStore::new("drive")),
            SessionOptions::default(),
            Arc::new(tx),
        );
        assert!(session.list().await.unwrap_err().is_fatal());
    }

    #[tokio::test]
    async fn test_sign_out_tears_down() {
        let store = seeded_store(&["alice/docs/a.txt"], 1000);
        let (session, _rx) = session(store);
        session.enter_folder("docs").await.unwrap();
        session.toggle_select(EntryId::file("a.txt"));
        session.resolve_link(&EntryId::file("a.txt"), LinkMode::Inline).await.unwrap();

        session.sign_out().await;
        assert!(session.root().await.is_none());
        assert!(session.view().is_none());
        assert!(session.selection().is_empty());
        assert!(session.current_path().is_root());
        assert!(session.links.is_empty());
        assert!(matches!(session.list().await, Err(DriveError::Auth(_))));
    }

    #[tokio::test]
    async fn test_cancel_operations_rotates_token() {
        let store = seeded_store(&["alice/docs/a.txt"], 1000);
        let (session, _rx) = session(store);
        let cancel = session.cancel_token();
        session.cancel_operations();
        assert!(cancel.is_cancelled());
        assert!(!session.cancel_token().is_cancelled());
    }
}
