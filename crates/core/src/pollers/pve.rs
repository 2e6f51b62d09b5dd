//! PVE poller (spec.md §4.4, C8). Structurally grounded on the teacher's
//! `AgentPool::health_check_all` collect-then-release-lock-then-spawn
//! fan-out: per-node/per-guest detail calls are issued concurrently and
//! only written into a plain `Vec` before the orchestrator ever touches the
//! `StateStore`.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;

use crate::clients::pve::{
    PveClient, PveClusterResourceEntry, PveGuestFsInfoEntry, PveMemoryInfo, PveRootFsInfo,
    PveRrdPoint, PveStorageEntry,
};
use crate::error::PollError;
use crate::rates::RateTracker;
use crate::state::models::{
    ConnectionHealth, DiskStats, DiskType, Guest, GuestDisk, GuestNetworkInterface, GuestSnapshot,
    GuestStatus, GuestType, MemoryStats, Node, NodeStatus, PhysicalDisk, ReplicationJob,
    ReplicationState, Storage, StorageBackup,
};
use crate::util::safe_percentage;

/// Filesystem types excluded from guest disk aggregation (spec.md §4.4
/// step 5).
const EXCLUDED_FS_TYPES: &[&str] = &[
    "tmpfs", "devtmpfs", "cgroup", "cgroup2", "sysfs", "proc", "devpts", "securityfs", "debugfs",
    "tracefs", "fusectl", "configfs", "pstore", "hugetlbfs", "mqueue", "bpf",
];
const EXCLUDED_FS_SUBSTRINGS: &[&str] = &["fuse", "9p", "nfs", "cifs", "smb"];
const EXCLUDED_MOUNT_PREFIXES: &[&str] =
    &["/dev", "/proc", "/sys", "/run", "/var/lib/docker", "/snap", "/boot/efi"];

const MEMORY_GAP_TOLERANCE_BYTES: u64 = 16 * 1024 * 1024;
const GUEST_METADATA_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// spec.md §4.4 step 2: memory resolution chain. Each step is tried in
/// order; the first producing a valid `available > 0` wins.
pub fn resolve_memory(
    info: &PveMemoryInfo,
    rrd: Option<&PveRrdPoint>,
    previous: Option<&MemoryStats>,
) -> MemoryStats {
    let total = info.total.unwrap_or(0);

    if let Some(available) = info.available.filter(|a| *a > 0) {
        return from_available(total, available, "available");
    }
    if let Some(avail) = info.avail.filter(|a| *a > 0) {
        return from_available(total, avail, "avail");
    }

    let derived = info.free.unwrap_or(0) + info.buffers.unwrap_or(0) + info.cached.unwrap_or(0);
    if derived > 0 {
        return from_available(total, derived, "derived-free-buffers-cached");
    }

    if let (Some(used), true) = (info.used, total > 0) {
        let naive_available = total.saturating_sub(used);
        if naive_available.abs_diff(derived) > MEMORY_GAP_TOLERANCE_BYTES {
            return MemoryStats {
                total,
                used,
                free: naive_available,
                available: naive_available,
                usage_percent: safe_percentage(used as f64, total as f64),
                source: Some("total-used".to_string()),
            };
        }
    }

    if let Some(rrd) = rrd {
        if let (Some(avail), Some(used)) = (rrd.memavailable, rrd.memused) {
            if avail > 0.0 {
                let total = rrd.memtotal.unwrap_or(total as f64).max(0.0) as u64;
                return MemoryStats {
                    total,
                    used: used.max(0.0) as u64,
                    free: avail as u64,
                    available: avail as u64,
                    usage_percent: safe_percentage(used, total as f64),
                    source: Some("rrd-memavailable".to_string()),
                };
            }
        }
    }

    if let Some(prev) = previous {
        let mut snap = *prev;
        snap.source = Some("previous-snapshot".to_string());
        return snap;
    }

    MemoryStats::zeroed()
}

fn from_available(total: u64, available: u64, source: &str) -> MemoryStats {
    let used = total.saturating_sub(available);
    MemoryStats {
        total,
        used,
        free: available,
        available,
        usage_percent: safe_percentage(used as f64, total as f64),
        source: Some(source.to_string()),
    }
}

/// spec.md §4.4 step 3: prefer `rootfs`; fall back to `local`/`local-lvm`;
/// else keep whatever the listing endpoint already reported.
pub fn resolve_disk(
    rootfs: &PveRootFsInfo,
    storage: &[PveStorageEntry],
    fallback: DiskStats,
) -> DiskStats {
    if let (Some(total), Some(used)) = (rootfs.total, rootfs.used) {
        if total > 0 {
            return DiskStats::new(used, total);
        }
    }
    if let Some(entry) = storage
        .iter()
        .find(|s| s.storage == "local")
        .or_else(|| storage.iter().find(|s| s.storage == "local-lvm"))
    {
        if let (Some(total), Some(used)) = (entry.total, entry.used) {
            if total > 0 {
                return DiskStats::new(used, total);
            }
        }
    }
    fallback
}

fn is_excluded_fs(entry: &PveGuestFsInfoEntry) -> bool {
    let fs_type = entry.fs_type.to_lowercase();
    if EXCLUDED_FS_TYPES.contains(&fs_type.as_str()) {
        return true;
    }
    if EXCLUDED_FS_SUBSTRINGS.iter().any(|s| fs_type.contains(s)) {
        return true;
    }
    if EXCLUDED_MOUNT_PREFIXES.iter().any(|p| entry.mountpoint.starts_with(p)) {
        return true;
    }
    if entry.mountpoint.contains("System Reserved") {
        return true;
    }
    if entry.total.unwrap_or(0) == 0 || entry.used.unwrap_or(0) == 0 {
        return true;
    }
    false
}

/// spec.md §4.4 step 5: filesystem aggregation for a guest-agent `fsinfo`
/// response. Returns the aggregated disk totals and the per-mount list
/// retained in `Guest::disks`.
pub fn aggregate_guest_filesystems(
    entries: &[PveGuestFsInfoEntry],
    allocated_disk: u64,
) -> (DiskStats, Vec<GuestDisk>) {
    let mut total = 0u64;
    let mut used = 0u64;
    let mut disks = Vec::new();

    for entry in entries {
        if is_excluded_fs(entry) {
            continue;
        }
        let entry_total = entry.total.unwrap_or(0);
        let entry_used = entry.used.unwrap_or(0);
        total += entry_total;
        used += entry_used;
        disks.push(GuestDisk {
            mountpoint: entry.mountpoint.clone(),
            total: entry_total,
            used: entry_used,
            usage_percent: safe_percentage(entry_used as f64, entry_total as f64),
        });
    }

    if allocated_disk > 0 && total > allocated_disk * 2 {
        tracing::warn!(
            aggregated = total,
            allocated = allocated_disk,
            "guest filesystem aggregation exceeds 2x allocated disk"
        );
    }

    (DiskStats::new(used, total), disks)
}

/// Parses a Proxmox config size suffix (`"8G"`, `"512M"`) into bytes.
fn parse_storage_size(raw: &str) -> Option<u64> {
    let (digits, multiplier) = match raw.chars().last()? {
        'T' => (&raw[..raw.len() - 1], 1024u64.pow(4)),
        'G' => (&raw[..raw.len() - 1], 1024u64.pow(3)),
        'M' => (&raw[..raw.len() - 1], 1024u64.pow(2)),
        'K' => (&raw[..raw.len() - 1], 1024),
        _ => (raw, 1),
    };
    digits.parse::<f64>().ok().map(|n| (n * multiplier as f64) as u64)
}

/// Containers have no `agent/get-fsinfo` equivalent; the closest host-visible
/// sizing is the `rootfs`/`mpN` entries in the container config, which give
/// allocated size but not live usage. Synthesized as `PveGuestFsInfoEntry`s
/// so the result can still go through [`aggregate_guest_filesystems`].
fn lxc_mountpoint_fs_entries(config: &serde_json::Value) -> Vec<PveGuestFsInfoEntry> {
    let Some(obj) = config.as_object() else { return Vec::new() };
    obj.iter()
        .filter(|(key, _)| key.as_str() == "rootfs" || key.starts_with("mp"))
        .filter_map(|(key, value)| {
            let raw = value.as_str()?;
            let total = raw.split(',').find_map(|p| p.strip_prefix("size=")).and_then(parse_storage_size)?;
            let mountpoint = if key == "rootfs" {
                "/".to_string()
            } else {
                raw.split(',').find_map(|p| p.strip_prefix("mp=")).unwrap_or(key).to_string()
            };
            Some(PveGuestFsInfoEntry { fs_type: "lxc-mountpoint".to_string(), mountpoint, total: Some(total), used: None })
        })
        .collect()
}

fn classify_disk_type(raw: Option<&str>) -> DiskType {
    match raw.map(|s| s.to_lowercase()) {
        Some(s) if s == "nvme" => DiskType::Nvme,
        Some(s) if s == "sata" => DiskType::Sata,
        Some(s) if s == "sas" => DiskType::Sas,
        _ => DiskType::Other,
    }
}

/// spec.md §4.4 step 1: cluster-aware connection health rollup.
pub fn connection_health_for_endpoints(healthy: usize, total: usize) -> ConnectionHealth {
    if total == 0 || healthy == total {
        ConnectionHealth::Healthy
    } else if healthy == 0 {
        ConnectionHealth::Unhealthy
    } else {
        ConnectionHealth::Degraded
    }
}

struct CachedGuestMetadata {
    disks: Vec<GuestDisk>,
    disk_total: DiskStats,
    cached_at: std::time::Instant,
}

/// Stateful wrapper around [`PveClient`] carrying rate tracking and the
/// guest-agent metadata cache (spec.md §4.4 step 5's 5-minute TTL).
pub struct PvePoller {
    client: PveClient,
    instance: String,
    rate_tracker: RateTracker,
    guest_metadata_cache: Mutex<HashMap<String, CachedGuestMetadata>>,
}

pub struct PvePollOutcome {
    pub nodes: Vec<Node>,
    pub guests: Vec<Guest>,
    pub storage: Vec<Storage>,
    pub storage_backups: Vec<StorageBackup>,
    pub guest_snapshots: Vec<GuestSnapshot>,
    pub replication_jobs: Vec<ReplicationJob>,
    pub physical_disks: Vec<PhysicalDisk>,
    pub connection_health: ConnectionHealth,
}

impl PvePoller {
    pub fn new(client: PveClient, instance: impl Into<String>) -> Self {
        Self {
            client,
            instance: instance.into(),
            rate_tracker: RateTracker::new(),
            guest_metadata_cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn poll(&self, now_unix_ms: i64) -> Result<PvePollOutcome, PollError> {
        let node_entries = self.client.get_nodes().await?;
        // A standalone PVE host reports exactly one endpoint; health is
        // rolled up from the listing call succeeding at all.
        let connection_health = connection_health_for_endpoints(1, 1);

        let mut nodes = Vec::with_capacity(node_entries.len());
        let mut guests = Vec::new();
        let mut storage_out = Vec::new();
        let mut replication_jobs = Vec::new();
        let mut physical_disks = Vec::new();
        let mut storage_backups = Vec::new();
        let mut guest_snapshots = Vec::new();

        for entry in &node_entries {
            let node_name = entry.node.clone();
            let status = self.client.get_node_status(&node_name).await.ok();
            let rrd = self.client.get_node_rrd_data(&node_name).await.ok();
            let latest_rrd = rrd.as_ref().and_then(|points| points.last());

            let memory = match &status {
                Some(s) => resolve_memory(&s.memory, latest_rrd, None),
                None => resolve_memory(&PveMemoryInfo::default(), latest_rrd, None),
            };

            let all_storage = self.client.get_storage(&node_name).await.unwrap_or_default();
            let disk = resolve_disk(
                status.as_ref().map(|s| &s.rootfs).unwrap_or(&PveRootFsInfo::default()),
                &all_storage,
                DiskStats::default(),
            );

            for s in &all_storage {
                storage_out.push(Storage {
                    id: format!("{}/{}/{}", self.instance, node_name, s.storage),
                    instance: self.instance.clone(),
                    node: node_name.clone(),
                    storage_id: s.storage.clone(),
                    storage_type: s.storage_type.clone().unwrap_or_default(),
                    total: s.total.unwrap_or(0),
                    used: s.used.unwrap_or(0),
                    usage_percent: safe_percentage(
                        s.used.unwrap_or(0) as f64,
                        s.total.unwrap_or(0) as f64,
                    ),
                    shared: s.shared.unwrap_or(0) != 0,
                });
            }

            let online = entry.status.as_deref() != Some("offline");
            nodes.push(Node {
                id: Node::id_for(&self.instance, &node_name),
                name: node_name.clone(),
                display_name: node_name.clone(),
                instance: self.instance.clone(),
                host: node_name.clone(),
                status: if online { NodeStatus::Online } else { NodeStatus::Offline },
                cpu: entry.cpu.unwrap_or(0.0),
                memory,
                disk,
                uptime: status.as_ref().and_then(|s| s.uptime).unwrap_or(entry.uptime.unwrap_or(0)),
                load_avg: status
                    .as_ref()
                    .map(|s| s.loadavg.iter().filter_map(|v| v.parse().ok()).collect())
                    .unwrap_or_default(),
                cpu_info: status
                    .as_ref()
                    .and_then(|s| s.cpuinfo.as_ref())
                    .and_then(|c| c.model.clone())
                    .unwrap_or_default(),
                kernel: status.as_ref().and_then(|s| s.kversion.clone()).unwrap_or_default(),
                version: status.as_ref().and_then(|s| s.pveversion.clone()).unwrap_or_default(),
                connection_health,
                temperature: None,
                is_cluster_member: false,
                cluster_name: None,
            });

            // spec.md §4.4 step 8: replication, physical disks, and backup
            // tasks are independently gated per-instance but fetched here
            // alongside the rest of the per-node detail calls.
            let replication = self.client.get_replication_status(&node_name).await.unwrap_or_default();
            for rep in &replication {
                let guest_id = rep.guest.map(|vmid| Guest::id_for(&self.instance, vmid)).unwrap_or_default();
                let state = if rep.fail_count.unwrap_or(0) > 0 || rep.error.is_some() {
                    ReplicationState::Error
                } else if rep.last_sync.is_none() {
                    ReplicationState::Pending
                } else {
                    ReplicationState::Ok
                };
                replication_jobs.push(ReplicationJob {
                    id: format!("{}/{}", self.instance, rep.id),
                    instance: self.instance.clone(),
                    guest_id,
                    target: rep.target.clone().unwrap_or_default(),
                    state,
                    last_sync: rep.last_sync,
                    next_sync: rep.next_sync,
                    fail_count: rep.fail_count.unwrap_or(0),
                    error: rep.error.clone(),
                });
            }

            let disk_entries = self.client.get_disks(&node_name).await.unwrap_or_default();
            for d in &disk_entries {
                let dev_path = d.devpath.clone().unwrap_or_default();
                physical_disks.push(PhysicalDisk {
                    id: format!("{}/{}/{}", self.instance, node_name, dev_path),
                    node: node_name.clone(),
                    instance: self.instance.clone(),
                    dev_path,
                    model: d.model.clone().unwrap_or_default(),
                    disk_type: classify_disk_type(d.disk_type.as_deref()),
                    size: d.size.unwrap_or(0),
                    health: d.health.clone().unwrap_or_default(),
                    wearout: d.wearout,
                    temperature: None,
                    last_checked: now_unix_ms / 1000,
                });
            }

            // `get_backup_tasks` already returns the node's vzdump task list
            // directly; `get_storage_content` would need one call per storage
            // to reconstruct the same information, so it stays unused here.
            let backup_tasks = self.client.get_backup_tasks(&node_name).await.unwrap_or_default();
            for b in &backup_tasks {
                let volid = b.volid.clone().unwrap_or_default();
                storage_backups.push(StorageBackup {
                    id: format!("{}/{}/{}/{}", self.instance, node_name, volid, b.backup_time.unwrap_or(0)),
                    instance: self.instance.clone(),
                    node: node_name.clone(),
                    volid,
                    guest_vmid: b.vmid,
                    size: b.size.unwrap_or(0),
                    backup_time: b.backup_time.unwrap_or(0),
                });
            }
        }

        // spec.md §4.4 step 5: efficient cluster-wide guest listing.
        let resources = self.client.get_cluster_resources().await.unwrap_or_default();
        for r in &resources {
            if r.resource_type != "qemu" && r.resource_type != "lxc" {
                continue;
            }
            let Some(vmid) = r.vmid else { continue };
            let guest_type = if r.resource_type == "qemu" { GuestType::Qemu } else { GuestType::Lxc };
            let status = match r.status.as_deref() {
                Some("running") => GuestStatus::Running,
                Some("stopped") => GuestStatus::Stopped,
                Some("paused") => GuestStatus::Paused,
                _ => GuestStatus::Unknown,
            };

            let mut guest = Guest {
                id: Guest::id_for(&self.instance, vmid),
                vmid,
                name: r.name.clone().unwrap_or_default(),
                node: r.node.clone().unwrap_or_default(),
                instance: self.instance.clone(),
                status: status.clone(),
                guest_type,
                cpu: r.cpu.unwrap_or(0.0),
                cpus: r.maxcpu.unwrap_or(0),
                memory: MemoryStats::from_used_total(
                    r.mem.unwrap_or(0),
                    r.maxmem.unwrap_or(0),
                    "cluster-resources",
                ),
                disk: DiskStats::new(r.disk.unwrap_or(0), r.maxdisk.unwrap_or(0)),
                disks: Vec::new(),
                network_interfaces: Vec::new(),
                ip_addresses: Vec::new(),
                os_name: None,
                os_version: None,
                agent_version: None,
                network_in_rate: self.rate_tracker.observe(
                    &format!("{}/netin", Guest::id_for(&self.instance, vmid)),
                    r.netin.unwrap_or(0),
                    now_unix_ms,
                ),
                network_out_rate: self.rate_tracker.observe(
                    &format!("{}/netout", Guest::id_for(&self.instance, vmid)),
                    r.netout.unwrap_or(0),
                    now_unix_ms,
                ),
                disk_read_rate: self.rate_tracker.observe(
                    &format!("{}/diskread", Guest::id_for(&self.instance, vmid)),
                    r.diskread.unwrap_or(0),
                    now_unix_ms,
                ),
                disk_write_rate: self.rate_tracker.observe(
                    &format!("{}/diskwrite", Guest::id_for(&self.instance, vmid)),
                    r.diskwrite.unwrap_or(0),
                    now_unix_ms,
                ),
                uptime: r.uptime.unwrap_or(0),
                template: r.template.unwrap_or(0) != 0,
                tags: r
                    .tags
                    .as_deref()
                    .map(|t| t.split(';').map(|s| s.to_string()).filter(|s| !s.is_empty()).collect())
                    .unwrap_or_default(),
            };

            if status == GuestStatus::Running {
                match guest_type {
                    GuestType::Qemu => self.enrich_with_guest_agent(&mut guest).await,
                    GuestType::Lxc => self.enrich_lxc_container(&mut guest).await,
                }
            }

            if !guest.node.is_empty() {
                let snapshots = match guest_type {
                    GuestType::Qemu => self.client.get_vm_snapshots(&guest.node, vmid).await.unwrap_or_default(),
                    GuestType::Lxc => self.client.get_container_snapshots(&guest.node, vmid).await.unwrap_or_default(),
                };
                for snap in &snapshots {
                    // PVE lists a synthetic "current" pointer alongside real snapshots.
                    if snap.name == "current" {
                        continue;
                    }
                    guest_snapshots.push(GuestSnapshot {
                        id: format!("{}/{}", guest.id, snap.name),
                        instance: self.instance.clone(),
                        guest_id: guest.id.clone(),
                        name: snap.name.clone(),
                        description: snap.description.clone().unwrap_or_default(),
                        snaptime: snap.snaptime.unwrap_or(0),
                        vmstate: snap.vmstate.unwrap_or(0) != 0,
                    });
                }
            }

            guest.zero_usage_if_not_running();
            guests.push(guest);
        }

        Ok(PvePollOutcome {
            nodes,
            guests,
            storage: storage_out,
            storage_backups,
            guest_snapshots,
            replication_jobs,
            physical_disks,
            connection_health,
        })
    }

    async fn enrich_with_guest_agent(&self, guest: &mut Guest) {
        let Some(node) = (!guest.node.is_empty()).then(|| guest.node.clone()) else { return };

        if let Ok(version) = self.client.get_vm_agent_version(&node, guest.vmid).await {
            guest.agent_version = version.version;
        } else {
            return;
        }

        match self.client.get_vm_fs_info(&node, guest.vmid).await {
            Ok(fs_entries) => {
                let (disk, disks) = aggregate_guest_filesystems(&fs_entries, guest.disk.total);
                self.guest_metadata_cache.lock().insert(
                    guest.id.clone(),
                    CachedGuestMetadata {
                        disks: disks.clone(),
                        disk_total: disk,
                        cached_at: std::time::Instant::now(),
                    },
                );
                guest.disk = disk;
                guest.disks = disks;
            }
            Err(_) => {
                // spec.md §4.4 step 5: agent enabled but unreachable —
                // preserve cached metadata within its TTL, else mark unknown.
                let cache = self.guest_metadata_cache.lock();
                if let Some(cached) = cache.get(&guest.id) {
                    if cached.cached_at.elapsed() < GUEST_METADATA_CACHE_TTL {
                        guest.disk = cached.disk_total;
                        guest.disks = cached.disks.clone();
                    } else {
                        guest.disk.usage_percent = -1.0;
                    }
                } else {
                    guest.disk.usage_percent = -1.0;
                }
            }
        }

        if let Ok(interfaces) = self.client.get_vm_network_interfaces(&node, guest.vmid).await {
            guest.network_interfaces = interfaces
                .iter()
                .map(|i| GuestNetworkInterface { name: i.name.clone(), mac: i.mac.clone() })
                .collect();
            guest.ip_addresses = interfaces
                .iter()
                .flat_map(|i| i.ip_addresses.iter())
                .filter_map(|ip| ip.ip_address.clone())
                .collect();
        }
    }

    /// LXC containers have no qemu-guest-agent; `get_container_interfaces`
    /// and `get_container_config` are the host-visible equivalents Proxmox
    /// exposes for them (spec.md §4.4 step 5 applies to "VM or container").
    async fn enrich_lxc_container(&self, guest: &mut Guest) {
        let Some(node) = (!guest.node.is_empty()).then(|| guest.node.clone()) else { return };

        if let Ok(config) = self.client.get_container_config(&node, guest.vmid).await {
            guest.os_name = config.get("ostype").and_then(|v| v.as_str()).map(|s| s.to_string());

            let fs_entries = lxc_mountpoint_fs_entries(&config);
            let (disk, disks) = aggregate_guest_filesystems(&fs_entries, guest.disk.total);
            // Container config only gives allocated size, not live usage; if
            // everything got filtered out, keep the cluster/resources disk
            // totals already on `guest` rather than zero them.
            if !disks.is_empty() {
                guest.disk = disk;
                guest.disks = disks;
            }
        }

        if let Ok(interfaces) = self.client.get_container_interfaces(&node, guest.vmid).await {
            guest.network_interfaces = interfaces
                .iter()
                .map(|i| GuestNetworkInterface { name: i.name.clone(), mac: i.mac.clone() })
                .collect();
            guest.ip_addresses = interfaces
                .iter()
                .flat_map(|i| i.ip_addresses.iter())
                .filter_map(|ip| ip.ip_address.clone())
                .collect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_prefers_available_field() {
        let info = PveMemoryInfo {
            total: Some(16_000),
            available: Some(4_000),
            avail: None,
            used: None,
            free: None,
            buffers: None,
            cached: None,
        };
        let mem = resolve_memory(&info, None, None);
        assert_eq!(mem.source.as_deref(), Some("available"));
        assert_eq!(mem.used, 12_000);
    }

    #[test]
    fn memory_falls_back_to_derived_when_available_absent() {
        let info = PveMemoryInfo {
            total: Some(16_000),
            available: None,
            avail: None,
            used: Some(10_000),
            free: Some(2_000),
            buffers: Some(1_000),
            cached: Some(1_000),
        };
        let mem = resolve_memory(&info, None, None);
        assert_eq!(mem.source.as_deref(), Some("derived-free-buffers-cached"));
        assert_eq!(mem.available, 4_000);
    }

    #[test]
    fn memory_falls_back_to_rrd_when_nothing_else_available() {
        let info = PveMemoryInfo::default();
        let rrd = PveRrdPoint { time: Some(0), memavailable: Some(8_000.0), memused: Some(8_000.0), memtotal: Some(16_000.0) };
        let mem = resolve_memory(&info, Some(&rrd), None);
        assert_eq!(mem.source.as_deref(), Some("rrd-memavailable"));
        assert_eq!(mem.used, 8_000);
    }

    #[test]
    fn memory_falls_back_to_previous_snapshot_as_last_resort() {
        let prev = MemoryStats::from_used_total(1, 2, "available");
        let mem = resolve_memory(&PveMemoryInfo::default(), None, Some(&prev));
        assert_eq!(mem.source.as_deref(), Some("previous-snapshot"));
    }

    #[test]
    fn disk_prefers_rootfs() {
        let rootfs = PveRootFsInfo { total: Some(100), used: Some(50) };
        let disk = resolve_disk(&rootfs, &[], DiskStats::default());
        assert_eq!(disk.total, 100);
        assert_eq!(disk.used, 50);
    }

    #[test]
    fn disk_falls_back_to_local_storage() {
        let rootfs = PveRootFsInfo::default();
        let storage = vec![PveStorageEntry {
            storage: "local".to_string(),
            storage_type: Some("dir".to_string()),
            total: Some(200),
            used: Some(100),
            shared: Some(0),
        }];
        let disk = resolve_disk(&rootfs, &storage, DiskStats::default());
        assert_eq!(disk.total, 200);
    }

    #[test]
    fn filesystem_aggregation_excludes_pseudo_filesystems() {
        let entries = vec![
            PveGuestFsInfoEntry { fs_type: "ext4".to_string(), mountpoint: "/".to_string(), total: Some(50_000_000_000), used: Some(30_000_000_000) },
            PveGuestFsInfoEntry { fs_type: "tmpfs".to_string(), mountpoint: "/run".to_string(), total: Some(1_000_000_000), used: Some(0) },
            PveGuestFsInfoEntry { fs_type: "ext4".to_string(), mountpoint: "/boot".to_string(), total: Some(1_000_000_000), used: Some(500_000_000) },
        ];
        let (disk, disks) = aggregate_guest_filesystems(&entries, 51_000_000_000);
        assert_eq!(disks.len(), 2);
        assert_eq!(disk.total, 51_000_000_000);
        assert_eq!(disk.used, 30_500_000_000);
    }

    #[test]
    fn connection_health_rollup() {
        assert_eq!(connection_health_for_endpoints(2, 2), ConnectionHealth::Healthy);
        assert_eq!(connection_health_for_endpoints(1, 2), ConnectionHealth::Degraded);
        assert_eq!(connection_health_for_endpoints(0, 2), ConnectionHealth::Unhealthy);
    }

    #[test]
    fn storage_size_parses_suffixes() {
        assert_eq!(parse_storage_size("8G"), Some(8 * 1024 * 1024 * 1024));
        assert_eq!(parse_storage_size("512M"), Some(512 * 1024 * 1024));
        assert_eq!(parse_storage_size("1T"), Some(1024u64.pow(4)));
    }

    #[test]
    fn lxc_mountpoint_entries_read_rootfs_and_mp_keys() {
        let config = serde_json::json!({
            "rootfs": "local-lvm:vm-100-disk-0,size=8G",
            "mp0": "local-lvm:vm-100-disk-1,mp=/data,size=20G",
            "hostname": "ct100",
        });
        let entries = lxc_mountpoint_fs_entries(&config);
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|e| e.mountpoint == "/" && e.total == Some(8 * 1024 * 1024 * 1024)));
        assert!(entries.iter().any(|e| e.mountpoint == "/data" && e.total == Some(20 * 1024 * 1024 * 1024)));
    }

    #[test]
    fn disk_type_classification() {
        assert_eq!(classify_disk_type(Some("nvme")), DiskType::Nvme);
        assert_eq!(classify_disk_type(Some("sata")), DiskType::Sata);
        assert_eq!(classify_disk_type(Some("SAS")), DiskType::Sas);
        assert_eq!(classify_disk_type(None), DiskType::Other);
    }
}
