//! Listing controller
//!
//! Lists one folder level, following continuation tokens to the end, and
//! guards the applied view against out-of-order responses with a generation
//! counter: only the most recently issued request may update the view.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::DriveResult;
use crate::model::Listing;
use crate::providers::{ListObjectsRequest, ObjectStore, StoreError};

/// Generation captured when a listing request is issued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListToken(u64);

impl ListToken {
    pub fn generation(&self) -> u64 {
        self.0
    }
}

/// What happened to a completed listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListOutcome {
    /// The listing was current and is now the view
    Applied(Listing),
    /// A newer request was issued meanwhile; the result was dropped
    Discarded,
}

impl ListOutcome {
    pub fn listing(&self) -> Option<&Listing> {
        match self {
            ListOutcome::Applied(listing) => Some(listing),
            ListOutcome::Discarded => None,
        }
    }

    pub fn is_discarded(&self) -> bool {
        matches!(self, ListOutcome::Discarded)
    }
}

pub struct ListingController {
    store: Arc<dyn ObjectStore>,
    generation: AtomicU64,
    view: Mutex<Option<Listing>>,
    /// (prefix, folder name) pairs left out of listings
    hidden: Vec<(String, String)>,
    page_hint: Option<u32>,
}

impl ListingController {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            generation: AtomicU64::new(0),
            view: Mutex::new(None),
            hidden: Vec::new(),
            page_hint: None,
        }
    }

    /// Hide folder `name` when listing exactly `prefix`
    pub fn with_hidden(mut self, prefix: impl Into<String>, name: impl Into<String>) -> Self {
        self.hidden.push((prefix.into(), name.into()));
        self
    }

    /// Page size hint passed to the store
    pub fn with_page_hint(mut self, max_keys: Option<u32>) -> Self {
        self.page_hint = max_keys;
        self
    }

    /// Start a new request; every earlier token becomes stale
    pub fn issue(&self) -> ListToken {
        ListToken(self.generation.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn is_current(&self, token: ListToken) -> bool {
        token.0 == self.current_generation()
    }

    /// Fetch every page of one folder level
    pub async fn fetch(&self, prefix: &str) -> Result<Listing, StoreError> {
        let hidden: Vec<String> = self
            .hidden
            .iter()
            .filter(|(p, _)| p == prefix)
            .map(|(_, name)| name.clone())
            .collect();

        let mut pages = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let request = ListObjectsRequest::children(prefix)
                .with_continuation(token.take())
                .with_max_keys(self.page_hint);
            let page = self.store.list_objects(&request).await?;
            token = page.next_token().map(str::to_string);
            pages.push(page);
            if token.is_none() {
                break;
            }
        }

        tracing::debug!("[Listing] {} page(s) for '{}'", pages.len(), prefix);
        Ok(Listing::from_pages(prefix, &pages, &hidden))
    }

    /// Apply a completed fetch if its token is still current.
    ///
    /// Stale results, errors included, are dropped without touching the view.
    /// A current error is returned and the previous view is kept.
    pub fn apply(
        &self,
        token: ListToken,
        result: Result<Listing, StoreError>,
    ) -> DriveResult<ListOutcome> {
        let mut view = self.view.lock().unwrap_or_else(|e| e.into_inner());
        if !self.is_current(token) {
            tracing::debug!(
                "[Listing] Discarding generation {} (current {})",
                token.0,
                self.current_generation()
            );
            return Ok(ListOutcome::Discarded);
        }

        let listing = result?;
        *view = Some(listing.clone());
        Ok(ListOutcome::Applied(listing))
    }

    /// Issue, fetch and apply in one call
    pub async fn list(&self, prefix: &str) -> DriveResult<ListOutcome> {
        let token = self.issue();
        let result = self.fetch(prefix).await;
        self.apply(token, result)
    }

    /// Last applied listing
    pub fn view(&self) -> Option<Listing> {
        self.view.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Forget the applied view and invalidate in-flight requests
    pub fn reset(&self) {
        self.issue();
        *self.view.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}
