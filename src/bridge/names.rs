//! Node identity: the 24-bit suffix key and the persisted suffix → name cache.

use crate::meshtastic::NodeRecord;
use crate::storage::{JsonStore, StoreError};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;
use thiserror::Error;

/// Low 24 bits of a node id, shown as six uppercase hex digits.
///
/// Distinct ids that differ only above bit 24 map to the same suffix; the bridge
/// treats them as one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Suffix(u32);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("`{0}` is not a node suffix (expected 6 hex digits or !xxxxxxxx)")]
pub struct SuffixError(pub String);

impl Suffix {
    pub fn from_node_id(node_id: u32) -> Self {
        Suffix(node_id & 0x00FF_FFFF)
    }

    /// Accepts exactly six hex digits (any case) or a full `!xxxxxxxx` node id.
    pub fn parse(input: &str) -> Result<Self, SuffixError> {
        let s = input.trim();
        let err = || SuffixError(s.to_string());
        if let Some(full) = s.strip_prefix('!') {
            if full.len() != 8 || !full.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(err());
            }
            return u32::from_str_radix(full, 16)
                .map(Self::from_node_id)
                .map_err(|_| err());
        }
        if s.len() != 6 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(err());
        }
        u32::from_str_radix(s, 16).map(Suffix).map_err(|_| err())
    }

    /// True when `node_id` resolves to this suffix.
    pub fn matches(&self, node_id: u32) -> bool {
        Self::from_node_id(node_id) == *self
    }
}

impl fmt::Display for Suffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06X}", self.0)
    }
}

impl TryFrom<String> for Suffix {
    type Error = SuffixError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Suffix::parse(&value)
    }
}

impl From<Suffix> for String {
    fn from(value: Suffix) -> Self {
        value.to_string()
    }
}

/// Outcome of reconciling the cache with the live node table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RefreshReport {
    pub added: usize,
    pub updated: usize,
    pub total: usize,
}

/// Suffix → display name, written through to `node_names.json` on every change.
///
/// Storage failures are logged and the cache keeps working from memory.
pub struct NodeIdentityCache {
    store: Option<JsonStore>,
    entries: Mutex<BTreeMap<Suffix, String>>,
}

impl NodeIdentityCache {
    /// Load from `store`. A missing or unreadable file yields an empty cache.
    pub fn load(store: JsonStore) -> Self {
        let entries = read_entries(&store).unwrap_or_default();
        info!("Loaded {} cached node names from {}", entries.len(), store.path().display());
        Self {
            store: Some(store),
            entries: Mutex::new(entries),
        }
    }

    /// Cache without a backing file.
    pub fn in_memory() -> Self {
        Self {
            store: None,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<Suffix, String>> {
        super::lock(&self.entries)
    }

    fn persist(&self, entries: &BTreeMap<Suffix, String>) {
        let Some(store) = &self.store else { return };
        match store.save(entries) {
            Ok(()) => debug!("Saved {} node names", entries.len()),
            Err(e) => warn!("Could not save node names: {}", e),
        }
    }

    pub fn get(&self, suffix: Suffix) -> Option<String> {
        self.lock().get(&suffix).cloned()
    }

    /// Cached name, or the suffix itself when unknown.
    pub fn lookup_name(&self, suffix: Suffix) -> String {
        self.get(suffix).unwrap_or_else(|| suffix.to_string())
    }

    /// Set the name for `suffix`. Persists and logs only when the value changes.
    pub fn upsert(&self, suffix: Suffix, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() {
            return false;
        }
        let mut entries = self.lock();
        let previous = entries.insert(suffix, name.to_string());
        if previous.as_deref() == Some(name) {
            return false;
        }
        match previous {
            Some(old) => info!("Node {} renamed: {} -> {}", suffix, old, name),
            None => info!("Node {} named {}", suffix, name),
        }
        self.persist(&entries);
        true
    }

    /// Reconcile against the live node table. `None` means the table is unavailable:
    /// nothing changes, but the cache is re-persisted.
    pub fn bulk_refresh(&self, nodes: Option<&[NodeRecord]>) -> RefreshReport {
        let mut entries = self.lock();
        let Some(nodes) = nodes else {
            warn!("No mesh node table available for name refresh");
            self.persist(&entries);
            return RefreshReport {
                total: entries.len(),
                ..RefreshReport::default()
            };
        };

        let mut report = RefreshReport::default();
        for node in nodes {
            let suffix = Suffix::from_node_id(node.id);
            let name = node
                .identity
                .preferred_label()
                .map(str::to_string)
                .unwrap_or_else(|| suffix.to_string());
            match entries.get(&suffix) {
                Some(current) if *current == name => {}
                Some(current) => {
                    info!("Node {} renamed: {} -> {}", suffix, current, name);
                    entries.insert(suffix, name);
                    report.updated += 1;
                }
                None => {
                    entries.insert(suffix, name);
                    report.added += 1;
                }
            }
        }
        report.total = entries.len();
        info!(
            "Name cache refreshed: {} added, {} updated, {} total",
            report.added, report.updated, report.total
        );
        self.persist(&entries);
        report
    }

    /// Drop every entry and persist the empty cache.
    pub fn clear(&self) {
        let mut entries = self.lock();
        entries.clear();
        self.persist(&entries);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// All entries ordered by suffix.
    pub fn snapshot(&self) -> Vec<(Suffix, String)> {
        self.lock().iter().map(|(s, n)| (*s, n.clone())).collect()
    }

    pub fn suffixes(&self) -> Vec<Suffix> {
        self.lock().keys().copied().collect()
    }

    /// Suffix whose cached name equals `query` exactly, or whose suffix equals it.
    pub fn find_by_name_or_suffix(&self, query: &str) -> Option<Suffix> {
        let query = query.trim();
        let as_suffix = Suffix::parse(query).ok();
        self.lock()
            .iter()
            .find(|(suffix, name)| name.as_str() == query || Some(**suffix) == as_suffix)
            .map(|(suffix, _)| *suffix)
    }
}

fn read_entries(store: &JsonStore) -> Result<BTreeMap<Suffix, String>, StoreError> {
    // Keys are parsed one by one so a single bad entry does not discard the file.
    let raw: BTreeMap<String, String> = match store.load() {
        Ok(raw) => raw,
        Err(e) if e.is_not_found() => {
            debug!("No name cache at {} yet", store.path().display());
            return Ok(BTreeMap::new());
        }
        Err(e) => {
            warn!("Could not load node names: {}", e);
            return Err(e);
        }
    };
    let mut entries = BTreeMap::new();
    for (key, name) in raw {
        match Suffix::parse(&key) {
            Ok(suffix) => {
                entries.insert(suffix, name);
            }
            Err(e) => warn!("Skipping cached name: {}", e),
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meshtastic::NodeIdentity;
    use crate::storage::NODE_NAMES_FILE;

    fn node(id: u32, short: Option<&str>, long: Option<&str>) -> NodeRecord {
        let mut n = NodeRecord::new(id);
        n.identity = NodeIdentity::new(short, long);
        n
    }

    #[test]
    fn suffix_is_low_24_bits_uppercase() {
        assert_eq!(Suffix::from_node_id(0x1A2B3C).to_string(), "1A2B3C");
        assert_eq!(Suffix::from_node_id(0xDEAD_BEEF).to_string(), "ADBEEF");
        assert_eq!(Suffix::from_node_id(0x10).to_string(), "000010");
        assert_eq!(Suffix::from_node_id(0x011A_2B3C), Suffix::from_node_id(0xFF1A_2B3C));
    }

    #[test]
    fn suffix_parse_accepts_hex_and_bang_ids() {
        assert_eq!(Suffix::parse("1a2b3c").unwrap().to_string(), "1A2B3C");
        assert_eq!(Suffix::parse("!ff1a2b3c").unwrap().to_string(), "1A2B3C");
        for bad in ["1A2B3", "1A2B3CD", "GGGGGG", "!1a2b3c", "", "+1A2B3"] {
            assert!(Suffix::parse(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn lookup_falls_back_to_suffix() {
        let cache = NodeIdentityCache::in_memory();
        let s = Suffix::from_node_id(0xABCDEF);
        assert_eq!(cache.lookup_name(s), "ABCDEF");
        cache.upsert(s, "Base");
        assert_eq!(cache.lookup_name(s), "Base");
    }

    #[test]
    fn upsert_persists_only_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::in_dir(dir.path(), NODE_NAMES_FILE);
        let cache = NodeIdentityCache::load(store.clone());
        let s = Suffix::from_node_id(0x1A2B3C);

        assert!(cache.upsert(s, "RLY1"));
        std::fs::remove_file(store.path()).unwrap();
        assert!(!cache.upsert(s, "RLY1"));
        assert!(!store.path().exists(), "unchanged upsert must not write");

        assert!(cache.upsert(s, "RLY2"));
        let on_disk: BTreeMap<String, String> = store.load().unwrap();
        assert_eq!(on_disk.get("1A2B3C").map(String::as_str), Some("RLY2"));
    }

    #[test]
    fn bulk_refresh_reports_diff() {
        let cache = NodeIdentityCache::in_memory();
        cache.upsert(Suffix::from_node_id(0x000001), "OLD");
        cache.upsert(Suffix::from_node_id(0x000002), "SAME");
        let table = vec![
            node(0x000001, Some("NEW"), None),
            node(0x000002, Some("SAME"), None),
            node(0x000003, None, Some("Long Only")),
            node(0x000004, Some(" "), None),
        ];
        let report = cache.bulk_refresh(Some(&table));
        assert_eq!(report, RefreshReport { added: 2, updated: 1, total: 4 });
        assert_eq!(cache.lookup_name(Suffix::from_node_id(3)), "Long Only");
        assert_eq!(cache.get(Suffix::from_node_id(4)).as_deref(), Some("000004"));
    }

    #[test]
    fn bulk_refresh_without_table_reports_size_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::in_dir(dir.path(), NODE_NAMES_FILE);
        let cache = NodeIdentityCache::load(store.clone());
        cache.upsert(Suffix::from_node_id(7), "N7");
        std::fs::remove_file(store.path()).unwrap();

        let report = cache.bulk_refresh(None);
        assert_eq!(report, RefreshReport { added: 0, updated: 0, total: 1 });
        assert!(store.path().exists());
    }

    #[test]
    fn corrupt_file_starts_empty_and_bad_keys_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::in_dir(dir.path(), NODE_NAMES_FILE);
        std::fs::write(store.path(), "{not json").unwrap();
        assert!(NodeIdentityCache::load(store.clone()).is_empty());

        std::fs::write(store.path(), r#"{"1A2B3C":"RLY1","bogus":"x"}"#).unwrap();
        let cache = NodeIdentityCache::load(store);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.lookup_name(Suffix::from_node_id(0x1A2B3C)), "RLY1");
    }

    #[test]
    fn find_matches_exact_name_or_suffix() {
        let cache = NodeIdentityCache::in_memory();
        cache.upsert(Suffix::from_node_id(0x1A2B3C), "RLY1");
        assert_eq!(cache.find_by_name_or_suffix("RLY1"), Some(Suffix::from_node_id(0x1A2B3C)));
        assert_eq!(cache.find_by_name_or_suffix("1a2b3c"), Some(Suffix::from_node_id(0x1A2B3C)));
        assert_eq!(cache.find_by_name_or_suffix("rly1"), None);
        assert_eq!(cache.find_by_name_or_suffix("ABCDEF"), None);
    }
}
