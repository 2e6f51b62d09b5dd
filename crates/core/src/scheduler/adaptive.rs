//! Adaptive Scheduler (spec.md §4.3, C5).
//!
//! A pure function of instance descriptors + queue depth -> scheduled
//! tasks; it holds no state of its own so the orchestrator can own its
//! lifetime without introducing a cycle back to the queue/breaker
//! (spec.md §9 "Cyclic references").

use crate::state::models::{BreakerState, ScheduledTask};

#[derive(Debug, Clone)]
pub struct InstanceDescriptor {
    pub name: String,
    pub instance_type: String,
    pub last_interval_secs: u64,
    pub last_scheduled: i64,
    pub last_success: Option<i64>,
    pub last_failure: Option<i64>,
    pub breaker_state: BreakerState,
    /// Count of consecutive polls whose change-hash differed from the one
    /// before — rising values bias the interval down.
    pub recent_change_count: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct AdaptiveConfig {
    pub base_interval_secs: u64,
    pub min_interval_secs: u64,
    pub max_interval_secs: u64,
    /// Queue depth above which intervals widen toward the max.
    pub queue_soft_limit: usize,
}

/// Builds the next `ScheduledTask` for each descriptor, steering each
/// instance's interval toward `baseInterval` on a quiet steady-state,
/// toward `minInterval` under errors/churn (bounded by breaker state), and
/// toward `maxInterval` under queue pressure.
pub fn plan(
    descriptors: &[InstanceDescriptor],
    queue_depth: usize,
    config: AdaptiveConfig,
    now_unix: i64,
) -> Vec<ScheduledTask> {
    descriptors
        .iter()
        .map(|d| {
            let interval = next_interval(d, queue_depth, config);
            ScheduledTask {
                instance_type: d.instance_type.clone(),
                instance_name: d.name.clone(),
                interval_secs: interval,
                next_run: now_unix + interval as i64,
            }
        })
        .collect()
}

fn next_interval(d: &InstanceDescriptor, queue_depth: usize, config: AdaptiveConfig) -> u64 {
    let mut interval = d.last_interval_secs.max(config.min_interval_secs);

    let recently_failed = d
        .last_failure
        .zip(d.last_success)
        .map(|(f, s)| f > s)
        .unwrap_or(d.last_failure.is_some());

    if recently_failed || d.recent_change_count >= 3 {
        if d.breaker_state == BreakerState::Open {
            interval = config.max_interval_secs;
        } else {
            interval = interval.saturating_sub(interval / 4).max(config.min_interval_secs);
        }
    } else {
        interval = drift_toward(interval, config.base_interval_secs);
    }

    if queue_depth > config.queue_soft_limit {
        interval = drift_toward(interval, config.max_interval_secs);
    }

    interval.clamp(config.min_interval_secs, config.max_interval_secs)
}

/// Moves `current` 25% of the way toward `target` — a gentle step rather
/// than an immediate jump, so a single good/bad cycle doesn't whipsaw the
/// interval.
fn drift_toward(current: u64, target: u64) -> u64 {
    if current == target {
        return current;
    }
    if current < target {
        current + ((target - current) / 4).max(1)
    } else {
        current - ((current - target) / 4).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AdaptiveConfig {
        AdaptiveConfig {
            base_interval_secs: 30,
            min_interval_secs: 10,
            max_interval_secs: 120,
            queue_soft_limit: 50,
        }
    }

    fn descriptor() -> InstanceDescriptor {
        InstanceDescriptor {
            name: "pve1".to_string(),
            instance_type: "pve".to_string(),
            last_interval_secs: 10,
            last_scheduled: 0,
            last_success: Some(10),
            last_failure: None,
            breaker_state: BreakerState::Closed,
            recent_change_count: 0,
        }
    }

    #[test]
    fn steady_state_drifts_toward_base() {
        let d = descriptor();
        let tasks = plan(&[d], 0, config(), 100);
        assert!(tasks[0].interval_secs > 10 && tasks[0].interval_secs <= 30);
    }

    #[test]
    fn errors_reduce_interval_toward_min() {
        let mut d = descriptor();
        d.last_interval_secs = 60;
        d.last_failure = Some(20);
        d.last_success = Some(10);
        let tasks = plan(&[d], 0, config(), 100);
        assert!(tasks[0].interval_secs < 60);
        assert!(tasks[0].interval_secs >= config().min_interval_secs);
    }

    #[test]
    fn open_breaker_forces_max_interval() {
        let mut d = descriptor();
        d.last_failure = Some(20);
        d.last_success = Some(10);
        d.breaker_state = BreakerState::Open;
        let tasks = plan(&[d], 0, config(), 100);
        assert_eq!(tasks[0].interval_secs, config().max_interval_secs);
    }

    #[test]
    fn queue_pressure_widens_interval() {
        let d = descriptor();
        let tasks_quiet = plan(&[d.clone()], 0, config(), 100);
        let tasks_pressured = plan(&[d], 999, config(), 100);
        assert!(tasks_pressured[0].interval_secs >= tasks_quiet[0].interval_secs);
    }

    #[test]
    fn interval_always_within_bounds() {
        let mut d = descriptor();
        d.last_interval_secs = 5;
        let tasks = plan(&[d], 0, config(), 100);
        assert!(tasks[0].interval_secs >= config().min_interval_secs);
        assert!(tasks[0].interval_secs <= config().max_interval_secs);
    }
}
