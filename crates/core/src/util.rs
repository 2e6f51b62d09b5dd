//! Small numeric/hashing helpers shared across pollers and the alert engine.

/// Replace NaN/Inf with 0.0 — pollers must tolerate missing/zero fields
/// from upstream payloads without propagating NaN/Inf into state or alerts
/// (spec.md §9 "Dynamic config objects").
pub fn safe_float(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

/// `100 * used / total`, or `0` when `total <= 0`. Never produces NaN/Inf.
pub fn safe_percentage(used: f64, total: f64) -> f64 {
    if total > 0.0 {
        safe_float(100.0 * used / total)
    } else {
        0.0
    }
}

/// Monotonic-counter to per-second rate. Returns 0 on a counter reset
/// (`current < previous`) or non-positive elapsed time, per spec.md §8's
/// rate-tracker invariant.
pub fn rate_per_second(previous: u64, current: u64, elapsed_secs: f64) -> f64 {
    if elapsed_secs <= 0.0 || current < previous {
        return 0.0;
    }
    safe_float((current - previous) as f64 / elapsed_secs)
}

/// Cheap, dependency-free 64-bit FNV-1a hash used as the staleness
/// tracker's change-hash (spec.md §4.4/GLOSSARY "change-hash").
pub fn fnv1a64(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut hash = OFFSET_BASIS;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Hash a JSON-serializable value deterministically via its serde_json
/// representation. Used to detect whether a poll's payload actually
/// changed since the last cycle.
pub fn change_hash<T: serde::Serialize>(value: &T) -> u64 {
    match serde_json::to_vec(value) {
        Ok(bytes) => fnv1a64(&bytes),
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_percentage_zero_total_is_zero() {
        assert_eq!(safe_percentage(5.0, 0.0), 0.0);
    }

    #[test]
    fn safe_percentage_normal_case() {
        assert!((safe_percentage(50.0, 200.0) - 25.0).abs() < 1e-9);
    }

    #[test]
    fn safe_float_replaces_nan_and_inf() {
        assert_eq!(safe_float(f64::NAN), 0.0);
        assert_eq!(safe_float(f64::INFINITY), 0.0);
        assert_eq!(safe_float(-f64::INFINITY), 0.0);
        assert_eq!(safe_float(3.5), 3.5);
    }

    #[test]
    fn rate_per_second_counter_reset_yields_zero() {
        assert_eq!(rate_per_second(1000, 500, 10.0), 0.0);
    }

    #[test]
    fn rate_per_second_normal_case() {
        assert!((rate_per_second(1000, 2000, 10.0) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn rate_per_second_zero_elapsed_is_zero() {
        assert_eq!(rate_per_second(1000, 2000, 0.0), 0.0);
    }

    #[test]
    fn change_hash_is_deterministic_and_sensitive() {
        let a = serde_json::json!({"used": 10, "total": 20});
        let b = serde_json::json!({"used": 10, "total": 20});
        let c = serde_json::json!({"used": 11, "total": 20});
        assert_eq!(change_hash(&a), change_hash(&b));
        assert_ne!(change_hash(&a), change_hash(&c));
    }
}
