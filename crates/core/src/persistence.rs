//! Configuration persistence interface (spec.md §1/§6): alert config,
//! ingest tokens, and node configuration are consumed only through this
//! trait. A real file/database-backed implementation is out of scope; the
//! in-memory default is what the crate ships and what tests exercise.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::alerts::config::AlertConfigTree;

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct IngestToken {
    pub token: String,
    pub label: String,
}

pub trait ConfigPersistence: Send + Sync {
    fn load_alert_config(&self) -> AlertConfigTree;
    fn save_alert_config(&self, config: AlertConfigTree);

    fn load_ingest_tokens(&self) -> Vec<IngestToken>;
    fn save_ingest_tokens(&self, tokens: Vec<IngestToken>);

    fn load_node_label(&self, node_id: &str) -> Option<String>;
    fn save_node_label(&self, node_id: &str, label: String);
}

#[derive(Default)]
pub struct InMemoryPersistence {
    alert_config: RwLock<AlertConfigTree>,
    ingest_tokens: RwLock<Vec<IngestToken>>,
    node_labels: RwLock<HashMap<String, String>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigPersistence for InMemoryPersistence {
    fn load_alert_config(&self) -> AlertConfigTree {
        self.alert_config.read().clone()
    }

    fn save_alert_config(&self, config: AlertConfigTree) {
        *self.alert_config.write() = config;
    }

    fn load_ingest_tokens(&self) -> Vec<IngestToken> {
        self.ingest_tokens.read().clone()
    }

    fn save_ingest_tokens(&self, tokens: Vec<IngestToken>) {
        *self.ingest_tokens.write() = tokens;
    }

    fn load_node_label(&self, node_id: &str) -> Option<String> {
        self.node_labels.read().get(node_id).cloned()
    }

    fn save_node_label(&self, node_id: &str, label: String) {
        self.node_labels.write().insert(node_id.to_string(), label);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_alert_config() {
        let store = InMemoryPersistence::new();
        let mut tree = AlertConfigTree::default();
        tree.guest_defaults.thresholds.insert(
            "cpu".to_string(),
            crate::alerts::config::Threshold {
                trigger: 90.0,
                clear: 80.0,
                duration_secs: 60,
                severity: crate::alerts::config::Severity::Warning,
                direction: crate::alerts::config::ThresholdDirection::HighAlerts,
            },
        );
        store.save_alert_config(tree);
        let loaded = store.load_alert_config();
        assert!(loaded.guest_defaults.thresholds.contains_key("cpu"));
    }

    #[test]
    fn node_labels_default_to_none() {
        let store = InMemoryPersistence::new();
        assert!(store.load_node_label("node1").is_none());
        store.save_node_label("node1", "rack-a".to_string());
        assert_eq!(store.load_node_label("node1"), Some("rack-a".to_string()));
    }
}
