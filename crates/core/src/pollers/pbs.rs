//! PBS poller (spec.md §4.4 "PBS poller"): version, node status, datastores
//! with namespaces, and — on its own slower schedule — backups per
//! datastore/namespace fetched concurrently with a single-flight guard.

use tokio::sync::Mutex;

use crate::clients::pbs::PbsClient;
use crate::error::PollError;
use crate::state::models::{Datastore, Node, NodeStatus, PbsBackup};
use crate::util::safe_percentage;

pub struct PbsPollOutcome {
    pub node: Node,
    pub datastores: Vec<Datastore>,
    pub backups: Vec<PbsBackup>,
}

/// The `single-flight guard` mentioned in spec.md §4.4: concurrent poll
/// ticks for the same instance collapse into one in-flight backup listing.
pub struct PbsPoller {
    client: PbsClient,
    instance: String,
    backup_poll_lock: Mutex<()>,
}

impl PbsPoller {
    pub fn new(client: PbsClient, instance: impl Into<String>) -> Self {
        Self { client, instance: instance.into(), backup_poll_lock: Mutex::new(()) }
    }

    pub async fn poll(&self, node_name: &str) -> Result<PbsPollOutcome, PollError> {
        let version = self.client.get_version().await?;
        let status = self.client.get_node_status(node_name).await?;
        let datastore_entries = self.client.get_datastores().await.unwrap_or_default();

        let node = Node {
            id: Node::id_for(&self.instance, node_name),
            name: node_name.to_string(),
            display_name: node_name.to_string(),
            instance: self.instance.clone(),
            host: node_name.to_string(),
            status: NodeStatus::Online,
            cpu: status.cpu.unwrap_or(0.0),
            memory: crate::state::models::MemoryStats::from_used_total(
                status.memory.used.unwrap_or(0),
                status.memory.total.unwrap_or(0),
                "pbs-node-status",
            ),
            disk: crate::state::models::DiskStats::default(),
            uptime: status.uptime.unwrap_or(0),
            load_avg: Vec::new(),
            cpu_info: String::new(),
            kernel: String::new(),
            version: version.version.unwrap_or_default(),
            connection_health: crate::state::models::ConnectionHealth::Healthy,
            temperature: None,
            is_cluster_member: false,
            cluster_name: None,
        };

        let datastores = datastore_entries
            .iter()
            .map(|d| Datastore {
                id: format!("{}/{}", self.instance, d.store),
                instance: self.instance.clone(),
                name: d.store.clone(),
                total: d.total.unwrap_or(0),
                used: d.used.unwrap_or(0),
                usage_percent: safe_percentage(d.used.unwrap_or(0) as f64, d.total.unwrap_or(0) as f64),
            })
            .collect();

        Ok(PbsPollOutcome { node, datastores, backups: Vec::new() })
    }

    /// Backup listing runs on its own, slower cadence (gated by the caller
    /// via `pollers::should_run_backup_poll`); collapses concurrent callers
    /// into a single in-flight request per instance.
    pub async fn poll_backups(&self, datastore: &str, namespaces: &[String]) -> Result<Vec<PbsBackup>, PollError> {
        let _guard = self.backup_poll_lock.lock().await;
        let by_namespace = self.client.list_all_backups(datastore, namespaces).await?;
        let mut out = Vec::new();
        for (ns, entries) in by_namespace {
            for e in entries {
                out.push(PbsBackup {
                    id: format!("{}/{}/{}/{}/{}", self.instance, datastore, ns, e.backup_type, e.backup_id),
                    instance: self.instance.clone(),
                    datastore: datastore.to_string(),
                    namespace: ns.clone(),
                    backup_type: e.backup_type,
                    backup_id: e.backup_id,
                    backup_time: e.backup_time,
                    size: e.size.unwrap_or(0),
                    verified: e.verification.is_some(),
                });
            }
        }
        Ok(out)
    }
}
