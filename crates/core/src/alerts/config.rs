//! Alert configuration tree (spec.md §4.7): `GuestDefaults`, `NodeDefaults`,
//! per-entity `Overrides`, and `CustomRules`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// spec.md §9 Open Question #2: whether `clear` applies symmetrically to
/// inverted metrics (e.g. free space, where lower is worse). Resolved as an
/// explicit per-metric parameter rather than inferred from the metric name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ThresholdDirection {
    /// Alert when the value rises above `trigger`; clears when it falls to
    /// or below `clear` (e.g. CPU usage %).
    HighAlerts,
    /// Alert when the value falls below `trigger`; clears when it rises to
    /// or above `clear` (e.g. free disk space).
    LowAlerts,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Threshold {
    pub trigger: f64,
    pub clear: f64,
    pub duration_secs: u64,
    pub severity: Severity,
    pub direction: ThresholdDirection,
}

impl Threshold {
    pub fn is_breached(&self, value: f64) -> bool {
        match self.direction {
            ThresholdDirection::HighAlerts => value >= self.trigger,
            ThresholdDirection::LowAlerts => value <= self.trigger,
        }
    }

    pub fn is_cleared(&self, value: f64) -> bool {
        match self.direction {
            ThresholdDirection::HighAlerts => value <= self.clear,
            ThresholdDirection::LowAlerts => value >= self.clear,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityDefaults {
    pub thresholds: HashMap<String, Threshold>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomRule {
    pub resource_id: String,
    pub metric: String,
    pub threshold: Threshold,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertConfigTree {
    pub guest_defaults: EntityDefaults,
    pub node_defaults: EntityDefaults,
    #[serde(default)]
    pub overrides: HashMap<String, EntityDefaults>,
    #[serde(default)]
    pub custom_rules: Vec<CustomRule>,
}

impl AlertConfigTree {
    /// Resolves the effective threshold for `(resourceId, metric)`,
    /// preferring a custom rule, then a per-entity override, then the
    /// `isGuest`-selected defaults.
    pub fn resolve(&self, resource_id: &str, metric: &str, is_guest: bool) -> Option<Threshold> {
        if let Some(rule) = self
            .custom_rules
            .iter()
            .find(|r| r.resource_id == resource_id && r.metric == metric)
        {
            return Some(rule.threshold);
        }
        if let Some(over) = self.overrides.get(resource_id) {
            if let Some(t) = over.thresholds.get(metric) {
                return Some(*t);
            }
        }
        let defaults = if is_guest { &self.guest_defaults } else { &self.node_defaults };
        defaults.thresholds.get(metric).copied()
    }
}

/// Tags that modify or silence alert evaluation (spec.md §4.7).
pub const TAG_NO_ALERTS: &str = "pulse-no-alerts";
pub const TAG_MONITOR_ONLY: &str = "pulse-monitor-only";
pub const TAG_RELAXED: &str = "pulse-relaxed";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_alerts_breach_and_clear() {
        let t = Threshold {
            trigger: 90.0,
            clear: 80.0,
            duration_secs: 60,
            severity: Severity::Warning,
            direction: ThresholdDirection::HighAlerts,
        };
        assert!(t.is_breached(95.0));
        assert!(!t.is_breached(85.0));
        assert!(t.is_cleared(75.0));
    }

    #[test]
    fn low_alerts_invert_breach_and_clear() {
        let t = Threshold {
            trigger: 10.0,
            clear: 20.0,
            duration_secs: 60,
            severity: Severity::Critical,
            direction: ThresholdDirection::LowAlerts,
        };
        assert!(t.is_breached(5.0));
        assert!(!t.is_breached(15.0));
        assert!(t.is_cleared(25.0));
    }

    #[test]
    fn custom_rule_takes_priority_over_defaults() {
        let mut tree = AlertConfigTree::default();
        tree.node_defaults.thresholds.insert(
            "cpu".to_string(),
            Threshold { trigger: 90.0, clear: 80.0, duration_secs: 60, severity: Severity::Warning, direction: ThresholdDirection::HighAlerts },
        );
        tree.custom_rules.push(CustomRule {
            resource_id: "node1".to_string(),
            metric: "cpu".to_string(),
            threshold: Threshold { trigger: 50.0, clear: 40.0, duration_secs: 30, severity: Severity::Critical, direction: ThresholdDirection::HighAlerts },
        });
        let resolved = tree.resolve("node1", "cpu", false).unwrap();
        assert_eq!(resolved.trigger, 50.0);
    }
}
