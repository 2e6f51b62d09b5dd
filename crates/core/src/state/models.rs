//! Entity types owned by the [`super::store::StateStore`] (spec.md §3).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::util::safe_percentage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpstreamType {
    Pve,
    Pbs,
    Pmg,
}

impl std::fmt::Display for UpstreamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpstreamType::Pve => write!(f, "pve"),
            UpstreamType::Pbs => write!(f, "pbs"),
            UpstreamType::Pmg => write!(f, "pmg"),
        }
    }
}

/// `(instanceType, instanceName)` — the unit of poller ownership, queue
/// uniqueness, and state partitioning throughout the system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct InstanceKey {
    pub instance_type: String,
    pub instance_name: String,
}

impl InstanceKey {
    pub fn new(instance_type: impl Into<String>, instance_name: impl Into<String>) -> Self {
        Self { instance_type: instance_type.into(), instance_name: instance_name.into() }
    }
}

impl std::fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.instance_type, self.instance_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterEndpoint {
    pub url: String,
    pub node_name: String,
    pub last_seen_online: Option<i64>,
    pub healthy: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Upstream {
    pub instance_type: UpstreamType,
    pub name: String,
    pub host: String,
    pub capabilities: Vec<String>,
    pub is_cluster: bool,
    pub endpoints: Vec<ClusterEndpoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionHealth {
    Healthy,
    Degraded,
    Error,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MemoryStats {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub available: u64,
    pub usage_percent: f64,
    /// Which step of the memory fallback chain produced this sample
    /// (spec.md §4.4 step 2), e.g. `"available"`, `"rrd-memavailable"`,
    /// `"derived-free-buffers-cached"`, `"previous-snapshot"`.
    #[serde(default)]
    pub source: Option<String>,
}

impl MemoryStats {
    pub fn from_used_total(used: u64, total: u64, source: impl Into<String>) -> Self {
        let free = total.saturating_sub(used);
        Self {
            total,
            used,
            free,
            available: free,
            usage_percent: safe_percentage(used as f64, total as f64),
            source: Some(source.into()),
        }
    }

    pub fn zeroed() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DiskStats {
    pub total: u64,
    pub used: u64,
    pub usage_percent: f64,
}

impl DiskStats {
    pub fn new(used: u64, total: u64) -> Self {
        Self { total, used, usage_percent: safe_percentage(used as f64, total as f64) }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub instance: String,
    pub host: String,
    pub status: NodeStatus,
    pub cpu: f64,
    pub memory: MemoryStats,
    pub disk: DiskStats,
    pub uptime: u64,
    pub load_avg: Vec<f64>,
    pub cpu_info: String,
    pub kernel: String,
    pub version: String,
    pub connection_health: ConnectionHealth,
    pub temperature: Option<f64>,
    pub is_cluster_member: bool,
    pub cluster_name: Option<String>,
}

impl Node {
    pub fn id_for(instance: &str, name: &str) -> String {
        format!("{instance}/{name}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuestType {
    Qemu,
    Lxc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuestStatus {
    Running,
    Stopped,
    Paused,
    Unknown,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuestDisk {
    pub mountpoint: String,
    pub total: u64,
    pub used: u64,
    pub usage_percent: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuestNetworkInterface {
    pub name: String,
    pub mac: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Guest {
    pub id: String,
    pub vmid: u32,
    pub name: String,
    pub node: String,
    pub instance: String,
    pub status: GuestStatus,
    pub guest_type: GuestType,
    pub cpu: f64,
    pub cpus: u32,
    pub memory: MemoryStats,
    pub disk: DiskStats,
    pub disks: Vec<GuestDisk>,
    pub network_interfaces: Vec<GuestNetworkInterface>,
    pub ip_addresses: Vec<String>,
    pub os_name: Option<String>,
    pub os_version: Option<String>,
    pub agent_version: Option<String>,
    pub network_in_rate: f64,
    pub network_out_rate: f64,
    pub disk_read_rate: f64,
    pub disk_write_rate: f64,
    pub uptime: u64,
    pub template: bool,
    pub tags: Vec<String>,
}

impl Guest {
    pub fn id_for(instance: &str, vmid: u32) -> String {
        format!("{instance}/{vmid}")
    }

    /// spec.md §3: "Guests with `status != running` MUST have all usage
    /// metrics zeroed." Called by the PVE poller before writing state.
    pub fn zero_usage_if_not_running(&mut self) {
        if self.status != GuestStatus::Running {
            self.cpu = 0.0;
            self.memory = MemoryStats::zeroed();
            self.disk.used = 0;
            self.disk.usage_percent = 0.0;
            self.network_in_rate = 0.0;
            self.network_out_rate = 0.0;
            self.disk_read_rate = 0.0;
            self.disk_write_rate = 0.0;
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Storage {
    pub id: String,
    pub instance: String,
    pub node: String,
    pub storage_id: String,
    pub storage_type: String,
    pub total: u64,
    pub used: u64,
    pub usage_percent: f64,
    pub shared: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Datastore {
    pub id: String,
    pub instance: String,
    pub name: String,
    pub total: u64,
    pub used: u64,
    pub usage_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PbsBackup {
    pub id: String,
    pub instance: String,
    pub datastore: String,
    pub namespace: String,
    pub backup_type: String,
    pub backup_id: String,
    pub backup_time: i64,
    pub size: u64,
    pub verified: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageBackup {
    pub id: String,
    pub instance: String,
    pub node: String,
    pub volid: String,
    pub guest_vmid: Option<u32>,
    pub size: u64,
    pub backup_time: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuestSnapshot {
    pub id: String,
    pub instance: String,
    pub guest_id: String,
    pub name: String,
    pub description: String,
    pub snaptime: i64,
    pub vmstate: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicationState {
    Ok,
    Pending,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationJob {
    pub id: String,
    pub instance: String,
    pub guest_id: String,
    pub target: String,
    pub state: ReplicationState,
    pub last_sync: Option<i64>,
    pub next_sync: Option<i64>,
    pub fail_count: u32,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PmgMailStats {
    pub instance: String,
    pub node: String,
    pub queue_length: u64,
    pub mail_in_24h: u64,
    pub mail_out_24h: u64,
    pub spam_in_24h: u64,
    pub virus_in_24h: u64,
    pub quarantine_spam_count: u64,
    pub quarantine_virus_count: u64,
    pub spam_score_distribution: Vec<u64>,
    pub config_backups: Vec<PmgConfigBackup>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PmgConfigBackup {
    pub filename: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskType {
    Nvme,
    Sata,
    Sas,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhysicalDisk {
    pub id: String,
    pub node: String,
    pub instance: String,
    pub dev_path: String,
    pub model: String,
    pub disk_type: DiskType,
    pub size: u64,
    pub health: String,
    pub wearout: Option<u8>,
    pub temperature: Option<f64>,
    pub last_checked: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DockerHostStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerContainer {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: String,
    pub cpu_percent: f64,
    pub memory_used: u64,
    pub memory_limit: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Queued,
    Dispatched,
    Acknowledged,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CommandType {
    QueueStop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerHostCommand {
    pub id: String,
    pub host_id: String,
    pub command_type: CommandType,
    pub payload: serde_json::Value,
    pub status: CommandStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerHost {
    pub id: String,
    pub agent_id: Option<String>,
    pub hostname: String,
    pub display_name: String,
    pub machine_id: Option<String>,
    pub token_id: Option<String>,
    pub status: DockerHostStatus,
    pub last_seen: i64,
    pub interval_seconds: u64,
    pub agent_version: String,
    pub containers: Vec<DockerContainer>,
    pub pending_uninstall: bool,
    pub hidden: bool,
    pub command: Option<DockerHostCommand>,
}

impl DockerHost {
    /// spec.md §4.6 "Health evaluation": `clamp(intervalSeconds*4, 30s, 10min)`.
    pub fn health_window_secs(&self) -> u64 {
        (self.interval_seconds * 4).clamp(30, 600)
    }

    pub fn is_healthy(&self, now_unix: i64) -> bool {
        let window = self.health_window_secs() as i64;
        now_unix.saturating_sub(self.last_seen) <= window
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub alert_type: String,
    pub level: AlertLevel,
    pub resource_id: String,
    pub resource_name: String,
    pub node: Option<String>,
    pub instance: String,
    pub message: String,
    pub value: f64,
    pub threshold: f64,
    pub start_time: i64,
    pub last_seen: i64,
    pub acknowledged: bool,
    pub ack_time: Option<i64>,
    pub ack_user: Option<String>,
}

impl Alert {
    /// Deterministic per spec.md §3/§4.7: `(resourceID + '-' + metric)`.
    pub fn make_id(resource_id: &str, metric: &str) -> String {
        format!("{resource_id}-{metric}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub instance_type: String,
    pub instance_name: String,
    pub interval_secs: u64,
    pub next_run: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSnapshot {
    pub state: BreakerState,
    pub failures: u32,
    pub last_failure: Option<i64>,
    pub retry_at: Option<i64>,
    pub last_transition: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StalenessSnapshot {
    pub last_success: Option<i64>,
    pub last_error: Option<i64>,
    pub change_hash: u64,
}

/// Per-(instanceType, instanceName) connection-health keyspace described in
/// spec.md §4.5 (`instance`, `docker-<id>`, `pbs-<name>`, `pmg-<name>`).
pub fn connection_health_key(kind: &str, name: &str) -> String {
    format!("{kind}-{name}")
}

pub type LabelMap = HashMap<String, String>;
