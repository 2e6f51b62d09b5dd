//! RateTracker (spec.md §4.4 step 7, §8): converts monotonic counters into
//! per-second rates, clamping to zero across counter resets.

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::util::rate_per_second;

#[derive(Debug, Clone, Copy)]
struct Sample {
    value: u64,
    at_unix_ms: i64,
}

/// Keyed by an arbitrary caller-chosen string, typically
/// `"{instance}/{entityId}/{metric}"`.
pub struct RateTracker {
    last: RwLock<HashMap<String, Sample>>,
}

impl RateTracker {
    pub fn new() -> Self {
        Self { last: RwLock::new(HashMap::new()) }
    }

    /// Returns the rate since the previous sample for `key`, or `0.0` if
    /// this is the first sample observed.
    pub fn observe(&self, key: &str, value: u64, at_unix_ms: i64) -> f64 {
        let mut last = self.last.write();
        let rate = match last.get(key) {
            Some(prev) => {
                let elapsed_secs = (at_unix_ms - prev.at_unix_ms) as f64 / 1000.0;
                rate_per_second(prev.value, value, elapsed_secs)
            }
            None => 0.0,
        };
        last.insert(key.to_string(), Sample { value, at_unix_ms });
        rate
    }

    pub fn clear(&self, key: &str) {
        self.last.write().remove(key);
    }
}

impl Default for RateTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_yields_zero() {
        let t = RateTracker::new();
        assert_eq!(t.observe("k", 100, 1000), 0.0);
    }

    #[test]
    fn second_sample_yields_rate() {
        let t = RateTracker::new();
        t.observe("k", 1000, 0);
        let rate = t.observe("k", 2000, 1000);
        assert!((rate - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn counter_reset_clamps_to_zero() {
        let t = RateTracker::new();
        t.observe("k", 1000, 0);
        let rate = t.observe("k", 500, 1000);
        assert_eq!(rate, 0.0);
    }

    #[test]
    fn independent_keys_do_not_interfere() {
        let t = RateTracker::new();
        t.observe("a", 100, 0);
        t.observe("b", 9000, 0);
        let rate_a = t.observe("a", 200, 1000);
        assert!((rate_a - 100.0).abs() < 1e-9);
    }
}
