//! Per-upstream Circuit Breaker (spec.md §4.2, C2).
//!
//! State transitions are driven by a lock-free `AtomicU8`-backed status
//! field, grounded on the teacher's `AgentConnection` health-status pattern
//! (`Ordering::Acquire`/`Release`); failure counting and backoff bookkeeping
//! sit behind a small `parking_lot::Mutex` since they're only touched on the
//! (comparatively rare) failure/recovery path.

use rand::Rng;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;

use crate::state::models::{BreakerState, CircuitBreakerSnapshot};

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub base_retry_secs: f64,
    pub max_delay_secs: f64,
    pub half_open_window_secs: f64,
    pub jitter: f64,
}

impl BreakerConfig {
    /// Compressed bounds for fast-cadence deployments (spec.md §4.2:
    /// "max poll interval ≤15s").
    pub fn compressed() -> Self {
        Self {
            failure_threshold: 3,
            base_retry_secs: 2.0,
            max_delay_secs: 10.0,
            half_open_window_secs: 2.0,
            jitter: 0.2,
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            base_retry_secs: 5.0,
            max_delay_secs: 300.0,
            half_open_window_secs: 5.0,
            jitter: 0.2,
        }
    }
}

struct Bookkeeping {
    failures: u32,
    last_failure: Option<i64>,
    retry_at: Option<i64>,
    last_transition: i64,
    half_open_probe_in_flight: bool,
}

pub struct CircuitBreaker {
    config: BreakerConfig,
    status: AtomicU8,
    bookkeeping: Mutex<Bookkeeping>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            status: AtomicU8::new(STATE_CLOSED),
            bookkeeping: Mutex::new(Bookkeeping {
                failures: 0,
                last_failure: None,
                retry_at: None,
                last_transition: 0,
                half_open_probe_in_flight: false,
            }),
        }
    }

    fn state(&self) -> BreakerState {
        match self.status.load(Ordering::Acquire) {
            STATE_OPEN => BreakerState::Open,
            STATE_HALF_OPEN => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        }
    }

    /// Whether a poll may proceed right now. Transitions Open -> HalfOpen
    /// when `retryAt` has passed, admitting a single probe.
    pub fn allow(&self, now_unix: i64) -> bool {
        match self.state() {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => {
                let mut bk = self.bookkeeping.lock().unwrap();
                if bk.half_open_probe_in_flight {
                    false
                } else {
                    bk.half_open_probe_in_flight = true;
                    true
                }
            }
            BreakerState::Open => {
                let mut bk = self.bookkeeping.lock().unwrap();
                if bk.retry_at.map(|r| now_unix >= r).unwrap_or(false) {
                    self.status.store(STATE_HALF_OPEN, Ordering::Release);
                    bk.last_transition = now_unix;
                    bk.half_open_probe_in_flight = true;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self, now_unix: i64) {
        let mut bk = self.bookkeeping.lock().unwrap();
        bk.failures = 0;
        bk.retry_at = None;
        bk.half_open_probe_in_flight = false;
        bk.last_transition = now_unix;
        self.status.store(STATE_CLOSED, Ordering::Release);
    }

    pub fn record_failure(&self, now_unix: i64) {
        let mut bk = self.bookkeeping.lock().unwrap();
        bk.failures += 1;
        bk.last_failure = Some(now_unix);
        bk.half_open_probe_in_flight = false;

        if bk.failures >= self.config.failure_threshold {
            let delay = self.backoff_delay(bk.failures);
            bk.retry_at = Some(now_unix + delay.ceil() as i64);
            bk.last_transition = now_unix;
            self.status.store(STATE_OPEN, Ordering::Release);
        }
    }

    /// `delay = clamp(baseRetry * 2^(failures-threshold), baseRetry, maxDelay) * (1 + jitter*U)`
    fn backoff_delay(&self, failures: u32) -> f64 {
        let exponent = failures.saturating_sub(self.config.failure_threshold);
        let raw = self.config.base_retry_secs * 2f64.powi(exponent as i32);
        let clamped = raw.clamp(self.config.base_retry_secs, self.config.max_delay_secs);
        let jitter_factor = 1.0 + self.config.jitter * rand::thread_rng().gen::<f64>();
        clamped * jitter_factor
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let bk = self.bookkeeping.lock().unwrap();
        CircuitBreakerSnapshot {
            state: self.state(),
            failures: bk.failures,
            last_failure: bk.last_failure,
            retry_at: bk.retry_at,
            last_transition: bk.last_transition,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_allows_and_opens_after_threshold() {
        let cb = CircuitBreaker::new(BreakerConfig::default());
        assert!(cb.allow(0));
        cb.record_failure(0);
        cb.record_failure(0);
        assert_eq!(cb.state(), BreakerState::Closed);
        cb.record_failure(0);
        assert_eq!(cb.state(), BreakerState::Open);
        assert!(!cb.allow(0));
    }

    #[test]
    fn half_open_allows_single_probe() {
        let cb = CircuitBreaker::new(BreakerConfig::compressed());
        cb.record_failure(0);
        cb.record_failure(0);
        cb.record_failure(0);
        let snap = cb.snapshot();
        let retry_at = snap.retry_at.unwrap();

        assert!(cb.allow(retry_at));
        assert_eq!(cb.state(), BreakerState::HalfOpen);
        assert!(!cb.allow(retry_at));
    }

    #[test]
    fn success_resets_to_closed() {
        let cb = CircuitBreaker::new(BreakerConfig::compressed());
        cb.record_failure(0);
        cb.record_failure(0);
        cb.record_failure(0);
        let retry_at = cb.snapshot().retry_at.unwrap();
        cb.allow(retry_at);
        cb.record_success(retry_at);
        assert_eq!(cb.state(), BreakerState::Closed);
        assert_eq!(cb.snapshot().failures, 0);
    }

    #[test]
    fn half_open_failure_reopens_with_new_retry_at() {
        let cb = CircuitBreaker::new(BreakerConfig::compressed());
        cb.record_failure(0);
        cb.record_failure(0);
        cb.record_failure(0);
        let retry_at = cb.snapshot().retry_at.unwrap();
        cb.allow(retry_at);
        cb.record_failure(retry_at);
        assert_eq!(cb.state(), BreakerState::Open);
        assert!(cb.snapshot().retry_at.unwrap() > retry_at);
    }

    #[test]
    fn backoff_never_exceeds_max_delay() {
        let cb = CircuitBreaker::new(BreakerConfig::compressed());
        for _ in 0..20 {
            cb.record_failure(0);
        }
        let delay = cb.backoff_delay(cb.snapshot().failures);
        assert!(delay <= cb.config.max_delay_secs * 1.2 + 1e-9);
    }
}
