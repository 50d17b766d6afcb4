//! Watched nodes, kept only on disk.
//!
//! Every call reads `favorites.json` in full and mutations rewrite it in full, so edits
//! made by hand while the bridge runs are picked up on the next read.

use super::names::Suffix;
use crate::storage::JsonStore;
use log::{info, warn};
use std::collections::BTreeSet;

pub struct FavoritesStore {
    store: JsonStore,
}

impl FavoritesStore {
    pub fn new(store: JsonStore) -> Self {
        Self { store }
    }

    /// Current favorites. Missing or unreadable files read as empty.
    pub fn list(&self) -> BTreeSet<Suffix> {
        match self.store.load::<Vec<String>>() {
            Ok(raw) => raw
                .into_iter()
                .filter_map(|s| match Suffix::parse(&s) {
                    Ok(suffix) => Some(suffix),
                    Err(e) => {
                        warn!("Ignoring favorite: {}", e);
                        None
                    }
                })
                .collect(),
            Err(e) => {
                if !e.is_not_found() {
                    warn!("Could not load favorites: {}", e);
                }
                BTreeSet::new()
            }
        }
    }

    /// Returns false when the suffix was already present.
    pub fn add(&self, suffix: Suffix) -> bool {
        let mut set = self.list();
        if !set.insert(suffix) {
            return false;
        }
        self.write(&set);
        true
    }

    /// Returns false when the suffix was not present.
    pub fn remove(&self, suffix: Suffix) -> bool {
        let mut set = self.list();
        if !set.remove(&suffix) {
            return false;
        }
        self.write(&set);
        true
    }

    fn write(&self, set: &BTreeSet<Suffix>) {
        let raw: Vec<String> = set.iter().map(Suffix::to_string).collect();
        match self.store.save(&raw) {
            Ok(()) => info!("Saved {} favorite nodes", raw.len()),
            Err(e) => warn!("Could not save favorites: {}", e),
        }
    }
}
