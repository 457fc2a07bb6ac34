//! Selection model for batch actions

use std::collections::BTreeSet;

use crate::model::{EntryId, Listing};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    items: BTreeSet<EntryId>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip membership of `id`; returns whether it is now selected
    pub fn toggle(&mut self, id: EntryId) -> bool {
        if self.items.remove(&id) {
            false
        } else {
            self.items.insert(id);
            true
        }
    }

    pub fn select(&mut self, id: EntryId) {
        self.items.insert(id);
    }

    pub fn remove(&mut self, id: &EntryId) -> bool {
        self.items.remove(id)
    }

    /// Replace the selection with every entry of the listing
    pub fn select_all(&mut self, listing: &Listing) {
        self.items = listing.ids().into_iter().collect();
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Drop entries that are no longer part of `listing`
    pub fn reconcile(&mut self, listing: &Listing) {
        self.items.retain(|id| listing.contains(id));
    }

    pub fn contains(&self, id: &EntryId) -> bool {
        self.items.contains(id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Selected ids, folders and files in name order
    pub fn ids(&self) -> Vec<EntryId> {
        self.items.iter().cloned().collect()
    }
}
