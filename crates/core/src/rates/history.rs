//! Bounded per-entity/metric history used for the RRD-style memory
//! fallback and for change-churn detection feeding the adaptive scheduler.
//!
//! Entries are garbage-collected the same way the teacher's
//! `metrics.rs::subscription_ended` drops a map entry once its last
//! subscriber count empties: once a key's buffer would exceed its
//! retention bounds, the oldest samples are dropped, and an empty buffer's
//! key is removed entirely rather than left dangling.

use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, Copy)]
pub struct HistorySample {
    pub at_unix_ms: i64,
    pub value: f64,
}

struct Series {
    samples: VecDeque<HistorySample>,
}

/// Caps a series by both sample count and max age.
pub struct RateHistory {
    max_samples: usize,
    max_age_ms: i64,
    series: RwLock<HashMap<String, Series>>,
}

impl RateHistory {
    pub fn new(max_samples: usize, max_age_ms: i64) -> Self {
        Self { max_samples, max_age_ms, series: RwLock::new(HashMap::new()) }
    }

    pub fn push(&self, key: &str, sample: HistorySample) {
        let mut series = self.series.write();
        let entry = series.entry(key.to_string()).or_insert_with(|| Series { samples: VecDeque::new() });
        entry.samples.push_back(sample);

        let cutoff = sample.at_unix_ms - self.max_age_ms;
        while entry.samples.front().map(|s| s.at_unix_ms < cutoff).unwrap_or(false) {
            entry.samples.pop_front();
        }
        while entry.samples.len() > self.max_samples {
            entry.samples.pop_front();
        }
        if entry.samples.is_empty() {
            series.remove(key);
        }
    }

    /// Most recent sample at or before `at_unix_ms`, for RRD-style
    /// historical lookups (spec.md §4.4 step 2, "RRD historical fallback").
    pub fn most_recent_before(&self, key: &str, at_unix_ms: i64) -> Option<HistorySample> {
        let series = self.series.read();
        series
            .get(key)?
            .samples
            .iter()
            .rev()
            .find(|s| s.at_unix_ms <= at_unix_ms)
            .copied()
    }

    pub fn len(&self, key: &str) -> usize {
        self.series.read().get(key).map(|s| s.samples.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, key: &str) -> bool {
        self.len(key) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_by_sample_count() {
        let h = RateHistory::new(3, i64::MAX);
        for i in 0..10 {
            h.push("k", HistorySample { at_unix_ms: i * 1000, value: i as f64 });
        }
        assert_eq!(h.len("k"), 3);
    }

    #[test]
    fn caps_by_age() {
        let h = RateHistory::new(100, 5000);
        h.push("k", HistorySample { at_unix_ms: 0, value: 1.0 });
        h.push("k", HistorySample { at_unix_ms: 10_000, value: 2.0 });
        assert_eq!(h.len("k"), 1);
    }

    #[test]
    fn empty_series_key_is_removed() {
        let h = RateHistory::new(100, 10);
        h.push("k", HistorySample { at_unix_ms: 0, value: 1.0 });
        h.push("k", HistorySample { at_unix_ms: 1000, value: 2.0 });
        assert!(h.is_empty("k"));
    }

    #[test]
    fn most_recent_before_finds_latest_eligible_sample() {
        let h = RateHistory::new(100, i64::MAX);
        h.push("k", HistorySample { at_unix_ms: 100, value: 1.0 });
        h.push("k", HistorySample { at_unix_ms: 200, value: 2.0 });
        let got = h.most_recent_before("k", 150).unwrap();
        assert_eq!(got.at_unix_ms, 100);
    }
}
