//! The `StateStore` (spec.md §4.5 / §5): one `parking_lot::RwLock`-guarded
//! collection per entity kind, partitioned by instance. Readers copy
//! partitions out under the read lock and never hold it across I/O;
//! the only writer for a given `(instance, kind)` is that instance's poller.

use parking_lot::RwLock;
use std::collections::HashMap;

use super::models::{
    Alert, DockerHost, Datastore, Guest, GuestSnapshot, Node, PbsBackup, PhysicalDisk,
    PmgMailStats, ReplicationJob, Storage, StorageBackup,
};

/// A single entity collection partitioned by instance name. Each partition
/// is replaced wholesale on update — spec.md §4.5 "atomically replaces the
/// partition for that instance; entities from other instances are untouched."
struct Partitioned<T> {
    by_instance: RwLock<HashMap<String, Vec<T>>>,
}

impl<T: Clone> Partitioned<T> {
    fn new() -> Self {
        Self { by_instance: RwLock::new(HashMap::new()) }
    }

    fn update(&self, instance: &str, items: Vec<T>) {
        self.by_instance.write().insert(instance.to_string(), items);
    }

    fn clear(&self, instance: &str) {
        self.by_instance.write().remove(instance);
    }

    fn snapshot_all(&self) -> Vec<T> {
        self.by_instance.read().values().flatten().cloned().collect()
    }

    fn snapshot_instance(&self, instance: &str) -> Vec<T> {
        self.by_instance.read().get(instance).cloned().unwrap_or_default()
    }
}

/// Immutable copy of the whole store, safe to hand to WebSocket broadcasts
/// and REST handlers without holding any lock (spec.md §4.5 "Snapshot").
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct StateSnapshot {
    pub nodes: Vec<Node>,
    pub guests: Vec<Guest>,
    pub storage: Vec<Storage>,
    pub datastores: Vec<Datastore>,
    pub pbs_backups: Vec<PbsBackup>,
    pub storage_backups: Vec<StorageBackup>,
    pub guest_snapshots: Vec<GuestSnapshot>,
    pub replication_jobs: Vec<ReplicationJob>,
    pub pmg_mail_stats: Vec<PmgMailStats>,
    pub physical_disks: Vec<PhysicalDisk>,
    pub docker_hosts: Vec<DockerHost>,
    pub active_alerts: Vec<Alert>,
    pub recently_resolved_alerts: Vec<Alert>,
    pub connection_health: HashMap<String, bool>,
    pub polling_cycles: u64,
    pub uptime_secs: u64,
}

pub struct StateStore {
    nodes: Partitioned<Node>,
    guests: Partitioned<Guest>,
    storage: Partitioned<Storage>,
    datastores: Partitioned<Datastore>,
    pbs_backups: Partitioned<PbsBackup>,
    storage_backups: Partitioned<StorageBackup>,
    guest_snapshots: Partitioned<GuestSnapshot>,
    replication_jobs: Partitioned<ReplicationJob>,
    pmg_mail_stats: Partitioned<PmgMailStats>,
    physical_disks: Partitioned<PhysicalDisk>,

    /// Agent-reported Docker/host entities are globally upserted (keyed by
    /// host ID), not partitioned by upstream instance (spec.md §4.5
    /// "Global upserts").
    docker_hosts: RwLock<HashMap<String, DockerHost>>,

    /// `instance -> bool` with the `docker-<id>`/`pbs-<name>`/`pmg-<name>`
    /// keyspace folded in via `models::connection_health_key`.
    connection_health: RwLock<HashMap<String, bool>>,

    /// Alert-cache projection, kept in sync by the orchestrator each cycle.
    active_alerts: RwLock<HashMap<String, Alert>>,
    recently_resolved_alerts: RwLock<Vec<Alert>>,

    polling_cycles: RwLock<u64>,
    started_at: std::time::Instant,
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            nodes: Partitioned::new(),
            guests: Partitioned::new(),
            storage: Partitioned::new(),
            datastores: Partitioned::new(),
            pbs_backups: Partitioned::new(),
            storage_backups: Partitioned::new(),
            guest_snapshots: Partitioned::new(),
            replication_jobs: Partitioned::new(),
            pmg_mail_stats: Partitioned::new(),
            physical_disks: Partitioned::new(),
            docker_hosts: RwLock::new(HashMap::new()),
            connection_health: RwLock::new(HashMap::new()),
            active_alerts: RwLock::new(HashMap::new()),
            recently_resolved_alerts: RwLock::new(Vec::new()),
            polling_cycles: RwLock::new(0),
            started_at: std::time::Instant::now(),
        }
    }

    pub fn update_nodes_for_instance(&self, instance: &str, nodes: Vec<Node>) {
        self.nodes.update(instance, nodes);
    }

    pub fn update_guests_for_instance(&self, instance: &str, guests: Vec<Guest>) {
        self.guests.update(instance, guests);
    }

    pub fn update_storage_for_instance(&self, instance: &str, storage: Vec<Storage>) {
        self.storage.update(instance, storage);
    }

    pub fn update_datastores_for_instance(&self, instance: &str, datastores: Vec<Datastore>) {
        self.datastores.update(instance, datastores);
    }

    pub fn update_pbs_backups_for_instance(&self, instance: &str, backups: Vec<PbsBackup>) {
        self.pbs_backups.update(instance, backups);
    }

    pub fn update_storage_backups_for_instance(&self, instance: &str, backups: Vec<StorageBackup>) {
        self.storage_backups.update(instance, backups);
    }

    pub fn update_guest_snapshots_for_instance(&self, instance: &str, snaps: Vec<GuestSnapshot>) {
        self.guest_snapshots.update(instance, snaps);
    }

    pub fn update_replication_jobs_for_instance(&self, instance: &str, jobs: Vec<ReplicationJob>) {
        self.replication_jobs.update(instance, jobs);
    }

    pub fn update_pmg_mail_stats_for_instance(&self, instance: &str, stats: Vec<PmgMailStats>) {
        self.pmg_mail_stats.update(instance, stats);
    }

    pub fn update_physical_disks_for_instance(&self, instance: &str, disks: Vec<PhysicalDisk>) {
        self.physical_disks.update(instance, disks);
    }

    /// spec.md §7 "Auth" handling: clear an instance's partitions while
    /// leaving one synthetic failed-placeholder node so the UI can still
    /// display it.
    pub fn clear_instance_with_placeholder(&self, instance: &str, placeholder: Node) {
        self.nodes.update(instance, vec![placeholder]);
        self.guests.clear(instance);
        self.storage.clear(instance);
        self.datastores.clear(instance);
        self.pbs_backups.clear(instance);
        self.storage_backups.clear(instance);
        self.guest_snapshots.clear(instance);
        self.replication_jobs.clear(instance);
        self.pmg_mail_stats.clear(instance);
        self.physical_disks.clear(instance);
    }

    pub fn nodes_for_instance(&self, instance: &str) -> Vec<Node> {
        self.nodes.snapshot_instance(instance)
    }

    pub fn guests_for_instance(&self, instance: &str) -> Vec<Guest> {
        self.guests.snapshot_instance(instance)
    }

    pub fn all_node_names(&self) -> Vec<String> {
        self.nodes.snapshot_all().into_iter().map(|n| n.name).collect()
    }

    pub fn upsert_docker_host(&self, host: DockerHost) {
        self.docker_hosts.write().insert(host.id.clone(), host);
    }

    pub fn get_docker_host(&self, id: &str) -> Option<DockerHost> {
        self.docker_hosts.read().get(id).cloned()
    }

    pub fn remove_docker_host(&self, id: &str) {
        self.docker_hosts.write().remove(id);
    }

    pub fn all_docker_hosts(&self) -> Vec<DockerHost> {
        self.docker_hosts.read().values().cloned().collect()
    }

    pub fn find_docker_host<F>(&self, predicate: F) -> Option<DockerHost>
    where
        F: Fn(&DockerHost) -> bool,
    {
        self.docker_hosts.read().values().find(|h| predicate(h)).cloned()
    }

    pub fn set_connection_health(&self, key: &str, healthy: bool) {
        self.connection_health.write().insert(key.to_string(), healthy);
    }

    pub fn connection_health(&self, key: &str) -> Option<bool> {
        self.connection_health.read().get(key).copied()
    }

    pub fn upsert_active_alert(&self, alert: Alert) {
        self.active_alerts.write().insert(alert.id.clone(), alert);
    }

    pub fn resolve_alert(&self, id: &str) {
        if let Some(alert) = self.active_alerts.write().remove(id) {
            let mut resolved = self.recently_resolved_alerts.write();
            resolved.push(alert);
            let len = resolved.len();
            if len > 200 {
                resolved.drain(0..len - 200);
            }
        }
    }

    pub fn active_alert(&self, id: &str) -> Option<Alert> {
        self.active_alerts.read().get(id).cloned()
    }

    pub fn active_alerts(&self) -> Vec<Alert> {
        self.active_alerts.read().values().cloned().collect()
    }

    /// spec.md §4.7 `CleanupAlertsForNodes(present)`: drop alerts whose node
    /// no longer exists.
    pub fn cleanup_alerts_for_nodes(&self, present: &std::collections::HashSet<String>) {
        self.active_alerts.write().retain(|_, alert| {
            alert.node.as_ref().map(|n| present.contains(n)).unwrap_or(true)
        });
    }

    /// spec.md §4.7 `pruneStaleDockerAlerts`: remove host-scoped alerts
    /// whose host is no longer in state.
    pub fn prune_stale_docker_alerts(&self) {
        let hosts = self.docker_hosts.read();
        self.active_alerts.write().retain(|_, alert| {
            if let Some(host_id) = alert.resource_id.strip_prefix("docker-") {
                hosts.contains_key(host_id)
            } else {
                true
            }
        });
    }

    pub fn increment_polling_cycles(&self) -> u64 {
        let mut cycles = self.polling_cycles.write();
        *cycles += 1;
        *cycles
    }

    /// Copies every partition under its own read lock; never holds a lock
    /// across I/O (spec.md §4.5 "Snapshot production must not hold the lock
    /// across I/O").
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            nodes: self.nodes.snapshot_all(),
            guests: self.guests.snapshot_all(),
            storage: self.storage.snapshot_all(),
            datastores: self.datastores.snapshot_all(),
            pbs_backups: self.pbs_backups.snapshot_all(),
            storage_backups: self.storage_backups.snapshot_all(),
            guest_snapshots: self.guest_snapshots.snapshot_all(),
            replication_jobs: self.replication_jobs.snapshot_all(),
            pmg_mail_stats: self.pmg_mail_stats.snapshot_all(),
            physical_disks: self.physical_disks.snapshot_all(),
            docker_hosts: self.docker_hosts.read().values().cloned().collect(),
            active_alerts: self.active_alerts.read().values().cloned().collect(),
            recently_resolved_alerts: self.recently_resolved_alerts.read().clone(),
            connection_health: self.connection_health.read().clone(),
            polling_cycles: *self.polling_cycles.read(),
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::models::{ConnectionHealth, DiskStats, MemoryStats, NodeStatus};

    fn test_node(instance: &str, name: &str) -> Node {
        Node {
            id: Node::id_for(instance, name),
            name: name.to_string(),
            display_name: name.to_string(),
            instance: instance.to_string(),
            host: "https://example".to_string(),
            status: NodeStatus::Online,
            cpu: 0.1,
            memory: MemoryStats::from_used_total(1, 2, "available"),
            disk: DiskStats::new(1, 2),
            uptime: 100,
            load_avg: vec![0.1, 0.2, 0.3],
            cpu_info: "x".to_string(),
            kernel: "linux".to_string(),
            version: "8.0".to_string(),
            connection_health: ConnectionHealth::Healthy,
            temperature: None,
            is_cluster_member: false,
            cluster_name: None,
        }
    }

    #[test]
    fn partition_update_replaces_only_that_instance() {
        let store = StateStore::new();
        store.update_nodes_for_instance("pve1", vec![test_node("pve1", "a")]);
        store.update_nodes_for_instance("pve2", vec![test_node("pve2", "b")]);
        store.update_nodes_for_instance("pve1", vec![test_node("pve1", "c")]);

        let snap = store.snapshot();
        assert_eq!(snap.nodes.len(), 2);
        assert!(snap.nodes.iter().any(|n| n.name == "c"));
        assert!(snap.nodes.iter().any(|n| n.name == "b"));
        assert!(!snap.nodes.iter().any(|n| n.name == "a"));
    }

    #[test]
    fn idempotent_update_yields_identical_snapshot() {
        let store = StateStore::new();
        let nodes = vec![test_node("pve1", "a")];
        store.update_nodes_for_instance("pve1", nodes.clone());
        let first = serde_json::to_string(&store.snapshot().nodes).unwrap();
        store.update_nodes_for_instance("pve1", nodes);
        let second = serde_json::to_string(&store.snapshot().nodes).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn resolve_alert_moves_it_to_recently_resolved() {
        let store = StateStore::new();
        let alert = Alert {
            id: "a-1".to_string(),
            alert_type: "cpu".to_string(),
            level: crate::state::models::AlertLevel::Warning,
            resource_id: "vm-1".to_string(),
            resource_name: "vm-1".to_string(),
            node: Some("node1".to_string()),
            instance: "pve1".to_string(),
            message: "cpu high".to_string(),
            value: 95.0,
            threshold: 90.0,
            start_time: 0,
            last_seen: 0,
            acknowledged: false,
            ack_time: None,
            ack_user: None,
        };
        store.upsert_active_alert(alert);
        assert_eq!(store.active_alerts().len(), 1);
        store.resolve_alert("a-1");
        assert_eq!(store.active_alerts().len(), 0);
        assert_eq!(store.snapshot().recently_resolved_alerts.len(), 1);
    }

    #[test]
    fn cleanup_alerts_for_nodes_drops_alerts_for_missing_nodes() {
        let store = StateStore::new();
        let mut alert = Alert {
            id: "a-1".to_string(),
            alert_type: "cpu".to_string(),
            level: crate::state::models::AlertLevel::Warning,
            resource_id: "vm-1".to_string(),
            resource_name: "vm-1".to_string(),
            node: Some("gone".to_string()),
            instance: "pve1".to_string(),
            message: "cpu high".to_string(),
            value: 95.0,
            threshold: 90.0,
            start_time: 0,
            last_seen: 0,
            acknowledged: false,
            ack_time: None,
            ack_user: None,
        };
        store.upsert_active_alert(alert.clone());
        alert.id = "a-2".to_string();
        alert.node = Some("still-here".to_string());
        store.upsert_active_alert(alert);

        let present: std::collections::HashSet<String> =
            ["still-here".to_string()].into_iter().collect();
        store.cleanup_alerts_for_nodes(&present);

        let remaining = store.active_alerts();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "a-2");
    }
}
