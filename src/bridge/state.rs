//! Process-lifetime bridge state shared by the relay, the monitors and admin commands.
//!
//! Each accessor on [`BridgeState`] takes one short lock for one logical update. No
//! guard escapes a method, so nothing here can be held across an `.await`.

use super::favorites::FavoritesStore;
use super::lock;
use super::names::{NodeIdentityCache, Suffix};
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Distinct days of per-node history kept.
pub const MAX_HISTORY_DAYS: usize = 7;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageStats {
    pub mesh_to_chat: u64,
    pub chat_to_mesh: u64,
}

/// Per-node inbound message totals plus a bounded per-day history.
#[derive(Debug, Default)]
pub struct NodeActivity {
    counts: HashMap<Suffix, u64>,
    history: HashMap<Suffix, BTreeMap<NaiveDate, u32>>,
}

impl NodeActivity {
    pub fn record(&mut self, suffix: Suffix, day: NaiveDate) {
        *self.counts.entry(suffix).or_default() += 1;
        let days = self.history.entry(suffix).or_default();
        *days.entry(day).or_default() += 1;
        while days.len() > MAX_HISTORY_DAYS {
            days.pop_first();
        }
    }

    pub fn count(&self, suffix: Suffix) -> u64 {
        self.counts.get(&suffix).copied().unwrap_or(0)
    }

    pub fn history(&self, suffix: Suffix) -> Vec<(NaiveDate, u32)> {
        self.history
            .get(&suffix)
            .map(|days| days.iter().map(|(d, c)| (*d, *c)).collect())
            .unwrap_or_default()
    }

    /// Busiest nodes first; ties ordered by suffix.
    pub fn top(&self, n: usize) -> Vec<(Suffix, u64)> {
        let mut all: Vec<_> = self.counts.iter().map(|(s, c)| (*s, *c)).collect();
        all.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        all.truncate(n);
        all
    }

    /// Nodes with at least one message on `day`, ordered by suffix.
    pub fn on_day(&self, day: NaiveDate) -> Vec<(Suffix, u32)> {
        let mut out: Vec<_> = self
            .history
            .iter()
            .filter_map(|(s, days)| days.get(&day).map(|c| (*s, *c)))
            .filter(|(_, c)| *c > 0)
            .collect();
        out.sort_unstable();
        out
    }
}

/// What a new voltage reading did to a node's low-battery latch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatteryTransition {
    /// Crossed below the threshold while unlatched: alert once.
    BecameLow,
    /// Back at or above the threshold while latched: latch cleared.
    Recovered,
    Unchanged,
}

#[derive(Debug, Default)]
pub struct BatteryTracker {
    last: HashMap<Suffix, f32>,
    low: HashSet<Suffix>,
}

impl BatteryTracker {
    pub fn observe(&mut self, suffix: Suffix, voltage: f32, threshold: f32) -> BatteryTransition {
        self.last.insert(suffix, voltage);
        if voltage < threshold {
            if self.low.insert(suffix) {
                return BatteryTransition::BecameLow;
            }
        } else if self.low.remove(&suffix) {
            return BatteryTransition::Recovered;
        }
        BatteryTransition::Unchanged
    }

    pub fn is_low(&self, suffix: Suffix) -> bool {
        self.low.contains(&suffix)
    }

    /// Last recorded voltages, lowest first.
    pub fn snapshot(&self) -> Vec<(Suffix, f32)> {
        let mut out: Vec<_> = self.last.iter().map(|(s, v)| (*s, *v)).collect();
        out.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        out
    }
}

/// Every suffix observed since start (or since the last cache reset).
#[derive(Debug, Default)]
pub struct SeenNodes {
    seen: HashSet<Suffix>,
}

impl SeenNodes {
    pub fn seeded<I: IntoIterator<Item = Suffix>>(initial: I) -> Self {
        Self {
            seen: initial.into_iter().collect(),
        }
    }

    /// Add `current` to the set and return the members that were not there before,
    /// sorted.
    pub fn absorb<I: IntoIterator<Item = Suffix>>(&mut self, current: I) -> Vec<Suffix> {
        let mut fresh: Vec<Suffix> = current.into_iter().filter(|s| self.seen.insert(*s)).collect();
        fresh.sort_unstable();
        fresh
    }

    pub fn contains(&self, suffix: Suffix) -> bool {
        self.seen.contains(&suffix)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn clear(&mut self) {
        self.seen.clear();
    }
}

/// All mutable bridge state, constructed once and shared by `Arc`.
pub struct BridgeState {
    pub names: NodeIdentityCache,
    pub favorites: FavoritesStore,
    stats: Mutex<MessageStats>,
    activity: Mutex<NodeActivity>,
    battery: Mutex<BatteryTracker>,
    seen: Mutex<SeenNodes>,
    started_at: Instant,
}

impl BridgeState {
    /// The seen-set starts with every suffix already in the name cache, so nodes known
    /// from a previous run are not announced again.
    pub fn new(names: NodeIdentityCache, favorites: FavoritesStore) -> Self {
        let seen = SeenNodes::seeded(names.suffixes());
        Self {
            names,
            favorites,
            stats: Mutex::new(MessageStats::default()),
            activity: Mutex::new(NodeActivity::default()),
            battery: Mutex::new(BatteryTracker::default()),
            seen: Mutex::new(seen),
            started_at: Instant::now(),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Count one inbound mesh message from `suffix` on local date `day`.
    pub fn record_inbound(&self, suffix: Suffix, day: NaiveDate) {
        lock(&self.stats).mesh_to_chat += 1;
        lock(&self.activity).record(suffix, day);
    }

    pub fn record_chat_to_mesh(&self) {
        lock(&self.stats).chat_to_mesh += 1;
    }

    pub fn stats(&self) -> MessageStats {
        *lock(&self.stats)
    }

    pub fn top_nodes(&self, n: usize) -> Vec<(Suffix, u64)> {
        lock(&self.activity).top(n)
    }

    pub fn counts_on(&self, day: NaiveDate) -> Vec<(Suffix, u32)> {
        lock(&self.activity).on_day(day)
    }

    pub fn node_history(&self, suffix: Suffix) -> Vec<(NaiveDate, u32)> {
        lock(&self.activity).history(suffix)
    }

    pub fn observe_battery(&self, suffix: Suffix, voltage: f32, threshold: f32) -> BatteryTransition {
        lock(&self.battery).observe(suffix, voltage, threshold)
    }

    pub fn battery_snapshot(&self) -> Vec<(Suffix, f32)> {
        lock(&self.battery).snapshot()
    }

    /// New suffixes among `current`; they are marked seen.
    pub fn absorb_seen<I: IntoIterator<Item = Suffix>>(&self, current: I) -> Vec<Suffix> {
        lock(&self.seen).absorb(current)
    }

    pub fn seen_count(&self) -> usize {
        lock(&self.seen).len()
    }

    /// Forget every cached name and every seen node.
    pub fn reset_names(&self) {
        self.names.clear();
        lock(&self.seen).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    fn sfx(id: u32) -> Suffix {
        Suffix::from_node_id(id)
    }

    #[test]
    fn history_keeps_seven_most_recent_days_in_any_order() {
        let mut activity = NodeActivity::default();
        for d in [9, 2, 5, 1, 8, 3, 7, 4, 6] {
            activity.record(sfx(1), day(d));
        }
        let kept: Vec<u32> = activity
            .history(sfx(1))
            .into_iter()
            .map(|(date, _)| chrono::Datelike::day(&date))
            .collect();
        assert_eq!(kept, vec![3, 4, 5, 6, 7, 8, 9]);
        assert_eq!(activity.count(sfx(1)), 9);
    }

    #[test]
    fn late_arrival_older_than_window_is_pruned_immediately() {
        let mut activity = NodeActivity::default();
        for d in 10..17 {
            activity.record(sfx(1), day(d));
        }
        activity.record(sfx(1), day(1));
        let history = activity.history(sfx(1));
        assert_eq!(history.len(), MAX_HISTORY_DAYS);
        assert_eq!(history[0].0, day(10));
    }

    #[test]
    fn top_and_today_views() {
        let mut activity = NodeActivity::default();
        activity.record(sfx(1), day(1));
        activity.record(sfx(2), day(1));
        activity.record(sfx(2), day(2));
        activity.record(sfx(3), day(2));
        assert_eq!(activity.top(2), vec![(sfx(2), 2), (sfx(1), 1)]);
        assert_eq!(activity.on_day(day(2)), vec![(sfx(2), 1), (sfx(3), 1)]);
        assert!(activity.on_day(day(3)).is_empty());
    }

    #[test]
    fn battery_alerts_twice_over_low_high_low_without_recovery_alert() {
        let mut tracker = BatteryTracker::default();
        let readings = [3.4, 3.3, 3.6, 3.4];
        let transitions: Vec<_> = readings.iter().map(|v| tracker.observe(sfx(1), *v, 3.5)).collect();
        assert_eq!(
            transitions,
            vec![
                BatteryTransition::BecameLow,
                BatteryTransition::Unchanged,
                BatteryTransition::Recovered,
                BatteryTransition::BecameLow,
            ]
        );
        assert!(tracker.is_low(sfx(1)));
    }

    #[test]
    fn threshold_itself_counts_as_healthy() {
        let mut tracker = BatteryTracker::default();
        assert_eq!(tracker.observe(sfx(1), 3.5, 3.5), BatteryTransition::Unchanged);
        assert!(!tracker.is_low(sfx(1)));
    }

    #[test]
    fn seen_nodes_report_only_newcomers() {
        let mut seen = SeenNodes::seeded([sfx(1)]);
        assert_eq!(seen.absorb([sfx(3), sfx(1), sfx(2)]), vec![sfx(2), sfx(3)]);
        assert!(seen.absorb([sfx(2), sfx(3)]).is_empty());
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn state_seeds_seen_from_names_and_reset_clears_both() {
        let names = NodeIdentityCache::in_memory();
        names.upsert(sfx(0xA), "A");
        let dir = tempfile::tempdir().unwrap();
        let favs = FavoritesStore::new(crate::storage::JsonStore::in_dir(dir.path(), "f.json"));
        let state = BridgeState::new(names, favs);
        assert_eq!(state.seen_count(), 1);
        assert!(state.absorb_seen([sfx(0xA)]).is_empty());

        state.reset_names();
        assert_eq!(state.seen_count(), 0);
        assert!(state.names.is_empty());
        assert_eq!(state.absorb_seen([sfx(0xA)]), vec![sfx(0xA)]);
    }

    #[test]
    fn counters_move_independently() {
        let names = NodeIdentityCache::in_memory();
        let dir = tempfile::tempdir().unwrap();
        let favs = FavoritesStore::new(crate::storage::JsonStore::in_dir(dir.path(), "f.json"));
        let state = BridgeState::new(names, favs);
        state.record_inbound(sfx(1), day(1));
        state.record_inbound(sfx(1), day(1));
        state.record_chat_to_mesh();
        assert_eq!(state.stats(), MessageStats { mesh_to_chat: 2, chat_to_mesh: 1 });
        assert_eq!(state.top_nodes(5), vec![(sfx(1), 2)]);
    }
}
