//! StalenessTracker (spec.md §3 `StalenessSnapshot`, §4.4 `recordTaskResult`).

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::state::models::StalenessSnapshot;
use crate::util::change_hash;

pub struct StalenessTracker {
    snapshots: RwLock<HashMap<String, StalenessSnapshot>>,
}

impl StalenessTracker {
    pub fn new() -> Self {
        Self { snapshots: RwLock::new(HashMap::new()) }
    }

    /// Records a successful poll's payload, refreshing the change-hash.
    /// Returns whether the payload actually changed since the last success.
    pub fn record_success<T: serde::Serialize>(
        &self,
        instance: &str,
        now_unix: i64,
        payload: &T,
    ) -> bool {
        let hash = change_hash(payload);
        let mut snapshots = self.snapshots.write();
        let entry = snapshots.entry(instance.to_string()).or_default();
        let changed = entry.change_hash != hash;
        entry.last_success = Some(now_unix);
        entry.change_hash = hash;
        changed
    }

    pub fn record_error(&self, instance: &str, now_unix: i64) {
        let mut snapshots = self.snapshots.write();
        snapshots.entry(instance.to_string()).or_default().last_error = Some(now_unix);
    }

    pub fn snapshot(&self, instance: &str) -> StalenessSnapshot {
        self.snapshots.read().get(instance).cloned().unwrap_or_default()
    }

    pub fn all(&self) -> HashMap<String, StalenessSnapshot> {
        self.snapshots.read().clone()
    }
}

impl Default for StalenessTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unchanged_payload_reports_no_change() {
        let tracker = StalenessTracker::new();
        let payload = serde_json::json!({"a": 1});
        assert!(tracker.record_success("pve1", 1, &payload));
        assert!(!tracker.record_success("pve1", 2, &payload));
    }

    #[test]
    fn changed_payload_reports_change() {
        let tracker = StalenessTracker::new();
        tracker.record_success("pve1", 1, &serde_json::json!({"a": 1}));
        assert!(tracker.record_success("pve1", 2, &serde_json::json!({"a": 2})));
    }

    #[test]
    fn error_does_not_clobber_last_success() {
        let tracker = StalenessTracker::new();
        tracker.record_success("pve1", 1, &serde_json::json!({"a": 1}));
        tracker.record_error("pve1", 2);
        let snap = tracker.snapshot("pve1");
        assert_eq!(snap.last_success, Some(1));
        assert_eq!(snap.last_error, Some(2));
    }
}
