//! Alert Engine (spec.md §4.7, C11). New logic unique to this domain,
//! written in the teacher's callback-and-state-struct idiom (methods take
//! `&self` and mutate atomics/locks in place, mirroring `AgentConnection`).

pub mod config;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;

use config::{AlertConfigTree, ThresholdDirection, TAG_MONITOR_ONLY, TAG_NO_ALERTS, TAG_RELAXED};

use crate::state::models::{Alert, AlertLevel};

/// Callbacks fired on alert lifecycle transitions (spec.md §4.7).
pub trait AlertCallbacks: Send + Sync {
    fn on_alert_raised(&self, alert: &Alert);
    fn on_alert_resolved(&self, id: &str);
    fn on_escalate(&self, alert: &Alert, level: usize);
}

pub struct NoopCallbacks;
impl AlertCallbacks for NoopCallbacks {
    fn on_alert_raised(&self, _alert: &Alert) {}
    fn on_alert_resolved(&self, _id: &str) {}
    fn on_escalate(&self, _alert: &Alert, _level: usize) {}
}

#[derive(Debug, Clone, Copy, Default)]
struct HysteresisState {
    breach_since: Option<i64>,
    clear_since: Option<i64>,
}

/// What the caller needs to evaluate one metric sample.
pub struct MetricSample<'a> {
    pub resource_id: &'a str,
    pub resource_name: &'a str,
    pub metric: &'a str,
    pub node: Option<&'a str>,
    pub instance: &'a str,
    pub value: f64,
    pub is_guest: bool,
    pub tags: &'a [String],
}

pub struct AlertEngine {
    config: RwLock<AlertConfigTree>,
    hysteresis: RwLock<HashMap<String, HysteresisState>>,
    active: RwLock<HashMap<String, Alert>>,
    callbacks: Arc<dyn AlertCallbacks>,
}

impl AlertEngine {
    pub fn new(config: AlertConfigTree, callbacks: Arc<dyn AlertCallbacks>) -> Self {
        Self {
            config: RwLock::new(config),
            hysteresis: RwLock::new(HashMap::new()),
            active: RwLock::new(HashMap::new()),
            callbacks,
        }
    }

    pub fn set_config(&self, config: AlertConfigTree) {
        *self.config.write() = config;
    }

    /// Evaluates one metric sample against the config tree, applying
    /// hysteresis and tag-based suppression. Returns the alert ID if a
    /// state transition (raised or resolved) occurred.
    pub fn evaluate(&self, sample: &MetricSample<'_>, now_unix: i64) -> Option<String> {
        if sample.tags.iter().any(|t| t == TAG_NO_ALERTS || t == TAG_MONITOR_ONLY) {
            return None;
        }

        let threshold = self.config.read().resolve(sample.resource_id, sample.metric, sample.is_guest)?;
        let id = Alert::make_id(sample.resource_id, sample.metric);

        let relaxed = sample.tags.iter().any(|t| t == TAG_RELAXED);
        let duration_secs = if relaxed { threshold.duration_secs * 2 } else { threshold.duration_secs };

        let breached = threshold.is_breached(sample.value);
        let cleared = threshold.is_cleared(sample.value);

        let mut hysteresis = self.hysteresis.write();
        let state = hysteresis.entry(id.clone()).or_default();

        let already_active = self.active.read().contains_key(&id);

        if !already_active {
            if breached {
                let since = *state.breach_since.get_or_insert(now_unix);
                if now_unix - since >= duration_secs as i64 {
                    state.breach_since = None;
                    drop(hysteresis);
                    self.raise(sample, threshold.trigger, threshold.severity, &id, now_unix);
                    return Some(id);
                }
            } else {
                state.breach_since = None;
            }
            return None;
        }

        // Already active: look for sustained clearance.
        if cleared {
            let since = *state.clear_since.get_or_insert(now_unix);
            if now_unix - since >= duration_secs as i64 {
                state.clear_since = None;
                drop(hysteresis);
                self.resolve(&id, now_unix);
                return Some(id);
            }
        } else {
            state.clear_since = None;
            drop(hysteresis);
            self.touch(&id, sample.value, now_unix);
        }

        None
    }

    fn raise(
        &self,
        sample: &MetricSample<'_>,
        threshold: f64,
        severity: config::Severity,
        id: &str,
        now_unix: i64,
    ) {
        let alert = Alert {
            id: id.to_string(),
            alert_type: sample.metric.to_string(),
            level: match severity {
                config::Severity::Warning => AlertLevel::Warning,
                config::Severity::Critical => AlertLevel::Critical,
            },
            resource_id: sample.resource_id.to_string(),
            resource_name: sample.resource_name.to_string(),
            node: sample.node.map(|n| n.to_string()),
            instance: sample.instance.to_string(),
            message: format!("{} breached threshold ({} >= {})", sample.metric, sample.value, threshold),
            value: sample.value,
            threshold,
            start_time: now_unix,
            last_seen: now_unix,
            acknowledged: false,
            ack_time: None,
            ack_user: None,
        };
        self.active.write().insert(id.to_string(), alert.clone());
        self.callbacks.on_alert_raised(&alert);
    }

    fn touch(&self, id: &str, value: f64, now_unix: i64) {
        if let Some(alert) = self.active.write().get_mut(id) {
            alert.value = value;
            alert.last_seen = now_unix;
        }
    }

    fn resolve(&self, id: &str, _now_unix: i64) {
        if self.active.write().remove(id).is_some() {
            self.callbacks.on_alert_resolved(id);
        }
    }

    /// spec.md §4.7 "acknowledgements are bound to (ID, startTime) and
    /// cleared when startTime changes."
    pub fn acknowledge(&self, id: &str, user: &str, now_unix: i64) -> bool {
        let mut active = self.active.write();
        if let Some(alert) = active.get_mut(id) {
            alert.acknowledged = true;
            alert.ack_time = Some(now_unix);
            alert.ack_user = Some(user.to_string());
            true
        } else {
            false
        }
    }

    pub fn active_alerts(&self) -> Vec<Alert> {
        self.active.read().values().cloned().collect()
    }

    pub fn escalate_due(&self, levels: &[(u64, String)], now_unix: i64) {
        let active = self.active.read().values().cloned().collect::<Vec<_>>();
        for alert in active {
            let age = now_unix - alert.start_time;
            for (idx, (delay, _filter)) in levels.iter().enumerate() {
                if age >= *delay as i64 {
                    self.callbacks.on_escalate(&alert, idx);
                }
            }
        }
    }

    /// spec.md §4.7 `CleanupAlertsForNodes(present)`.
    pub fn cleanup_for_nodes(&self, present: &HashSet<String>) {
        let mut active = self.active.write();
        let removed: Vec<String> = active
            .iter()
            .filter(|(_, a)| a.node.as_ref().map(|n| !present.contains(n)).unwrap_or(false))
            .map(|(id, _)| id.clone())
            .collect();
        for id in removed {
            active.remove(&id);
            drop_guard_resolve(&self.callbacks, &id);
        }
    }

    /// spec.md §4.7 `pruneStaleDockerAlerts`.
    pub fn prune_stale_docker_alerts(&self, known_host_ids: &HashSet<String>) {
        let mut active = self.active.write();
        let removed: Vec<String> = active
            .iter()
            .filter_map(|(id, a)| {
                a.resource_id
                    .strip_prefix("docker-")
                    .filter(|host_id| !known_host_ids.contains(*host_id))
                    .map(|_| id.clone())
            })
            .collect();
        for id in removed {
            active.remove(&id);
            drop_guard_resolve(&self.callbacks, &id);
        }
    }
}

fn drop_guard_resolve(callbacks: &Arc<dyn AlertCallbacks>, id: &str) {
    callbacks.on_alert_resolved(id);
}

impl ThresholdDirection {
    pub fn inverted(self) -> Self {
        match self {
            ThresholdDirection::HighAlerts => ThresholdDirection::LowAlerts,
            ThresholdDirection::LowAlerts => ThresholdDirection::HighAlerts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{EntityDefaults, Severity, Threshold};
    use std::sync::Mutex;

    struct RecordingCallbacks {
        raised: Mutex<Vec<String>>,
        resolved: Mutex<Vec<String>>,
    }
    impl RecordingCallbacks {
        fn new() -> Self {
            Self { raised: Mutex::new(Vec::new()), resolved: Mutex::new(Vec::new()) }
        }
    }
    impl AlertCallbacks for RecordingCallbacks {
        fn on_alert_raised(&self, alert: &Alert) {
            self.raised.lock().unwrap().push(alert.id.clone());
        }
        fn on_alert_resolved(&self, id: &str) {
            self.resolved.lock().unwrap().push(id.to_string());
        }
        fn on_escalate(&self, _alert: &Alert, _level: usize) {}
    }

    fn engine_with_cpu_threshold() -> (Arc<RecordingCallbacks>, AlertEngine) {
        let mut tree = AlertConfigTree::default();
        tree.guest_defaults.thresholds.insert(
            "cpu".to_string(),
            Threshold { trigger: 90.0, clear: 80.0, duration_secs: 0, severity: Severity::Warning, direction: ThresholdDirection::HighAlerts },
        );
        let cb = Arc::new(RecordingCallbacks::new());
        let engine = AlertEngine::new(tree, cb.clone());
        (cb, engine)
    }

    fn sample<'a>(resource: &'a str, value: f64, tags: &'a [String]) -> MetricSample<'a> {
        MetricSample {
            resource_id: resource,
            resource_name: resource,
            metric: "cpu",
            node: Some("node1"),
            instance: "pve1",
            value,
            is_guest: true,
            tags,
        }
    }

    #[test]
    fn breach_raises_alert_immediately_with_zero_duration() {
        let (cb, engine) = engine_with_cpu_threshold();
        let tags = vec![];
        let id = engine.evaluate(&sample("vm-101", 95.0, &tags), 0);
        assert!(id.is_some());
        assert_eq!(cb.raised.lock().unwrap().len(), 1);
    }

    #[test]
    fn ack_persists_across_polls_with_same_start_time() {
        let (_cb, engine) = engine_with_cpu_threshold();
        let tags = vec![];
        let id = engine.evaluate(&sample("vm-101", 95.0, &tags), 0).unwrap();
        engine.acknowledge(&id, "alice", 30);
        engine.evaluate(&sample("vm-101", 96.0, &tags), 60);
        let alert = engine.active_alerts().into_iter().find(|a| a.id == id).unwrap();
        assert!(alert.acknowledged);
        assert_eq!(alert.start_time, 0);
    }

    #[test]
    fn clear_resolves_and_next_breach_gets_new_start_time() {
        let (cb, engine) = engine_with_cpu_threshold();
        let tags = vec![];
        let id = engine.evaluate(&sample("vm-101", 95.0, &tags), 0).unwrap();
        engine.acknowledge(&id, "alice", 30);
        let resolved_id = engine.evaluate(&sample("vm-101", 50.0, &tags), 120).unwrap();
        assert_eq!(resolved_id, id);
        assert_eq!(cb.resolved.lock().unwrap().len(), 1);

        let new_id = engine.evaluate(&sample("vm-101", 95.0, &tags), 180).unwrap();
        assert_eq!(new_id, id);
        let alert = engine.active_alerts().into_iter().find(|a| a.id == new_id).unwrap();
        assert_eq!(alert.start_time, 180);
        assert!(!alert.acknowledged);
    }

    #[test]
    fn no_alerts_tag_suppresses_evaluation() {
        let (_cb, engine) = engine_with_cpu_threshold();
        let tags = vec![TAG_NO_ALERTS.to_string()];
        let id = engine.evaluate(&sample("vm-101", 99.0, &tags), 0);
        assert!(id.is_none());
        assert!(engine.active_alerts().is_empty());
    }

    #[test]
    fn cleanup_for_nodes_drops_alerts_on_removed_nodes() {
        let (cb, engine) = engine_with_cpu_threshold();
        let tags = vec![];
        engine.evaluate(&sample("vm-101", 95.0, &tags), 0);
        let present: HashSet<String> = HashSet::new();
        engine.cleanup_for_nodes(&present);
        assert!(engine.active_alerts().is_empty());
        assert_eq!(cb.resolved.lock().unwrap().len(), 1);
    }

    #[test]
    fn duration_gated_threshold_requires_sustained_breach() {
        let mut tree = AlertConfigTree::default();
        tree.guest_defaults.thresholds.insert(
            "cpu".to_string(),
            Threshold { trigger: 90.0, clear: 80.0, duration_secs: 30, severity: Severity::Warning, direction: ThresholdDirection::HighAlerts },
        );
        let cb = Arc::new(RecordingCallbacks::new());
        let engine = AlertEngine::new(tree, cb.clone());
        let tags = vec![];
        assert!(engine.evaluate(&sample("vm-101", 95.0, &tags), 0).is_none());
        assert!(engine.evaluate(&sample("vm-101", 95.0, &tags), 10).is_none());
        assert!(engine.evaluate(&sample("vm-101", 95.0, &tags), 35).is_some());
    }

    #[test]
    fn entity_override_wins_over_guest_defaults() {
        let mut tree = AlertConfigTree::default();
        tree.guest_defaults.thresholds.insert(
            "cpu".to_string(),
            Threshold { trigger: 90.0, clear: 80.0, duration_secs: 0, severity: Severity::Warning, direction: ThresholdDirection::HighAlerts },
        );
        let mut override_defaults = EntityDefaults::default();
        override_defaults.thresholds.insert(
            "cpu".to_string(),
            Threshold { trigger: 50.0, clear: 40.0, duration_secs: 0, severity: Severity::Critical, direction: ThresholdDirection::HighAlerts },
        );
        tree.overrides.insert("vm-101".to_string(), override_defaults);
        let resolved = tree.resolve("vm-101", "cpu", true).unwrap();
        assert_eq!(resolved.trigger, 50.0);
    }
}
