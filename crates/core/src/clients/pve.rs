//! PVE REST client (spec.md §6 verb list). Method names are lifted directly
//! from the spec; wire shapes are minimal structs tolerant of missing
//! fields per spec.md §9's "dynamic config objects" note.

use serde::Deserialize;

use super::{DataEnvelope, HttpTransport};
use crate::error::PollError;

#[derive(Debug, Clone, Deserialize)]
pub struct PveNodeEntry {
    pub node: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub cpu: Option<f64>,
    #[serde(default)]
    pub maxmem: Option<u64>,
    #[serde(default)]
    pub mem: Option<u64>,
    #[serde(default)]
    pub uptime: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PveMemoryInfo {
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub used: Option<u64>,
    #[serde(default)]
    pub free: Option<u64>,
    #[serde(default)]
    pub available: Option<u64>,
    #[serde(default)]
    pub avail: Option<u64>,
    #[serde(default)]
    pub buffers: Option<u64>,
    #[serde(default)]
    pub cached: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PveRootFsInfo {
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub used: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PveNodeStatus {
    #[serde(default)]
    pub memory: PveMemoryInfo,
    #[serde(default)]
    pub rootfs: PveRootFsInfo,
    #[serde(default)]
    pub uptime: Option<u64>,
    #[serde(default)]
    pub loadavg: Vec<String>,
    #[serde(default)]
    pub kversion: Option<String>,
    #[serde(default)]
    pub pveversion: Option<String>,
    #[serde(default)]
    pub cpuinfo: Option<PveCpuInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PveCpuInfo {
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PveRrdPoint {
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(default)]
    pub memavailable: Option<f64>,
    #[serde(default)]
    pub memused: Option<f64>,
    #[serde(default)]
    pub memtotal: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PveClusterResourceEntry {
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default)]
    pub vmid: Option<u32>,
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub cpu: Option<f64>,
    #[serde(default)]
    pub maxcpu: Option<u32>,
    #[serde(default)]
    pub mem: Option<u64>,
    #[serde(default)]
    pub maxmem: Option<u64>,
    #[serde(default)]
    pub disk: Option<u64>,
    #[serde(default)]
    pub maxdisk: Option<u64>,
    #[serde(default)]
    pub netin: Option<u64>,
    #[serde(default)]
    pub netout: Option<u64>,
    #[serde(default)]
    pub diskread: Option<u64>,
    #[serde(default)]
    pub diskwrite: Option<u64>,
    #[serde(default)]
    pub uptime: Option<u64>,
    #[serde(default)]
    pub template: Option<u8>,
    #[serde(default)]
    pub tags: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PveGuestFsInfoEntry {
    #[serde(rename = "type")]
    pub fs_type: String,
    pub mountpoint: String,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub used: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PveGuestNetworkInterfaceEntry {
    pub name: String,
    #[serde(rename = "hardware-address", default)]
    pub mac: Option<String>,
    #[serde(rename = "ip-addresses", default)]
    pub ip_addresses: Vec<PveGuestIpAddress>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PveGuestIpAddress {
    #[serde(rename = "ip-address", default)]
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PveGuestAgentInfo {
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PveStorageEntry {
    pub storage: String,
    #[serde(rename = "type", default)]
    pub storage_type: Option<String>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub used: Option<u64>,
    #[serde(default)]
    pub shared: Option<u8>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PveBackupTask {
    #[serde(default)]
    pub volid: Option<String>,
    #[serde(default)]
    pub vmid: Option<u32>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(rename = "ctime", default)]
    pub backup_time: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PveReplicationEntry {
    pub id: String,
    #[serde(default)]
    pub guest: Option<u32>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(rename = "last_sync", default)]
    pub last_sync: Option<i64>,
    #[serde(rename = "next_sync", default)]
    pub next_sync: Option<i64>,
    #[serde(rename = "fail_count", default)]
    pub fail_count: Option<u32>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PveSnapshotEntry {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub snaptime: Option<i64>,
    #[serde(default)]
    pub vmstate: Option<u8>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PveDiskEntry {
    #[serde(default)]
    pub devpath: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(rename = "type", default)]
    pub disk_type: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub health: Option<String>,
    #[serde(default)]
    pub wearout: Option<u8>,
}

pub struct PveClient {
    transport: HttpTransport,
    upstream_name: String,
}

impl PveClient {
    pub fn new(transport: HttpTransport, upstream_name: impl Into<String>) -> Self {
        Self { transport, upstream_name: upstream_name.into() }
    }

    fn upstream(&self) -> &str {
        &self.upstream_name
    }

    pub async fn get_nodes(&self) -> Result<Vec<PveNodeEntry>, PollError> {
        let env: DataEnvelope<Vec<PveNodeEntry>> =
            self.transport.get_json(self.upstream(), "api2/json/nodes").await?;
        Ok(env.data)
    }

    pub async fn get_node_status(&self, node: &str) -> Result<PveNodeStatus, PollError> {
        let env: DataEnvelope<PveNodeStatus> = self
            .transport
            .get_json(self.upstream(), &format!("api2/json/nodes/{node}/status"))
            .await?;
        Ok(env.data)
    }

    pub async fn get_node_rrd_data(&self, node: &str) -> Result<Vec<PveRrdPoint>, PollError> {
        let env: DataEnvelope<Vec<PveRrdPoint>> = self
            .transport
            .get_json(
                self.upstream(),
                &format!("api2/json/nodes/{node}/rrddata?timeframe=hour"),
            )
            .await?;
        Ok(env.data)
    }

    pub async fn get_cluster_resources(&self) -> Result<Vec<PveClusterResourceEntry>, PollError> {
        let env: DataEnvelope<Vec<PveClusterResourceEntry>> = self
            .transport
            .get_json(self.upstream(), "api2/json/cluster/resources")
            .await?;
        Ok(env.data)
    }

    pub async fn get_vms(&self, node: &str) -> Result<Vec<PveClusterResourceEntry>, PollError> {
        let env: DataEnvelope<Vec<PveClusterResourceEntry>> = self
            .transport
            .get_json(self.upstream(), &format!("api2/json/nodes/{node}/qemu"))
            .await?;
        Ok(env.data)
    }

    pub async fn get_containers(&self, node: &str) -> Result<Vec<PveClusterResourceEntry>, PollError> {
        let env: DataEnvelope<Vec<PveClusterResourceEntry>> = self
            .transport
            .get_json(self.upstream(), &format!("api2/json/nodes/{node}/lxc"))
            .await?;
        Ok(env.data)
    }

    pub async fn get_vm_status(&self, node: &str, vmid: u32) -> Result<PveClusterResourceEntry, PollError> {
        let env: DataEnvelope<PveClusterResourceEntry> = self
            .transport
            .get_json(self.upstream(), &format!("api2/json/nodes/{node}/qemu/{vmid}/status/current"))
            .await?;
        Ok(env.data)
    }

    pub async fn get_container_status(&self, node: &str, vmid: u32) -> Result<PveClusterResourceEntry, PollError> {
        let env: DataEnvelope<PveClusterResourceEntry> = self
            .transport
            .get_json(self.upstream(), &format!("api2/json/nodes/{node}/lxc/{vmid}/status/current"))
            .await?;
        Ok(env.data)
    }

    pub async fn get_container_config(&self, node: &str, vmid: u32) -> Result<serde_json::Value, PollError> {
        let env: DataEnvelope<serde_json::Value> = self
            .transport
            .get_json(self.upstream(), &format!("api2/json/nodes/{node}/lxc/{vmid}/config"))
            .await?;
        Ok(env.data)
    }

    pub async fn get_container_interfaces(
        &self,
        node: &str,
        vmid: u32,
    ) -> Result<Vec<PveGuestNetworkInterfaceEntry>, PollError> {
        let env: DataEnvelope<Vec<PveGuestNetworkInterfaceEntry>> = self
            .transport
            .get_json(self.upstream(), &format!("api2/json/nodes/{node}/lxc/{vmid}/interfaces"))
            .await?;
        Ok(env.data)
    }

    pub async fn get_storage(&self, node: &str) -> Result<Vec<PveStorageEntry>, PollError> {
        let env: DataEnvelope<Vec<PveStorageEntry>> = self
            .transport
            .get_json(self.upstream(), &format!("api2/json/nodes/{node}/storage"))
            .await?;
        Ok(env.data)
    }

    pub async fn get_all_storage(&self) -> Result<Vec<PveStorageEntry>, PollError> {
        let env: DataEnvelope<Vec<PveStorageEntry>> =
            self.transport.get_json(self.upstream(), "api2/json/storage").await?;
        Ok(env.data)
    }

    pub async fn get_storage_content(&self, node: &str, storage: &str) -> Result<Vec<PveBackupTask>, PollError> {
        let env: DataEnvelope<Vec<PveBackupTask>> = self
            .transport
            .get_json(self.upstream(), &format!("api2/json/nodes/{node}/storage/{storage}/content"))
            .await?;
        Ok(env.data)
    }

    pub async fn get_backup_tasks(&self, node: &str) -> Result<Vec<PveBackupTask>, PollError> {
        let env: DataEnvelope<Vec<PveBackupTask>> = self
            .transport
            .get_json(self.upstream(), &format!("api2/json/nodes/{node}/tasks?typefilter=vzdump"))
            .await?;
        Ok(env.data)
    }

    pub async fn get_replication_status(&self, node: &str) -> Result<Vec<PveReplicationEntry>, PollError> {
        let env: DataEnvelope<Vec<PveReplicationEntry>> = self
            .transport
            .get_json(self.upstream(), &format!("api2/json/nodes/{node}/replication"))
            .await?;
        Ok(env.data)
    }

    pub async fn get_vm_snapshots(&self, node: &str, vmid: u32) -> Result<Vec<PveSnapshotEntry>, PollError> {
        let env: DataEnvelope<Vec<PveSnapshotEntry>> = self
            .transport
            .get_json(self.upstream(), &format!("api2/json/nodes/{node}/qemu/{vmid}/snapshot"))
            .await?;
        Ok(env.data)
    }

    pub async fn get_container_snapshots(&self, node: &str, vmid: u32) -> Result<Vec<PveSnapshotEntry>, PollError> {
        let env: DataEnvelope<Vec<PveSnapshotEntry>> = self
            .transport
            .get_json(self.upstream(), &format!("api2/json/nodes/{node}/lxc/{vmid}/snapshot"))
            .await?;
        Ok(env.data)
    }

    pub async fn get_vm_fs_info(&self, node: &str, vmid: u32) -> Result<Vec<PveGuestFsInfoEntry>, PollError> {
        let env: DataEnvelope<Vec<PveGuestFsInfoEntry>> = self
            .transport
            .get_json(
                self.upstream(),
                &format!("api2/json/nodes/{node}/qemu/{vmid}/agent/get-fsinfo"),
            )
            .await?;
        Ok(env.data)
    }

    pub async fn get_vm_network_interfaces(
        &self,
        node: &str,
        vmid: u32,
    ) -> Result<Vec<PveGuestNetworkInterfaceEntry>, PollError> {
        let env: DataEnvelope<Vec<PveGuestNetworkInterfaceEntry>> = self
            .transport
            .get_json(
                self.upstream(),
                &format!("api2/json/nodes/{node}/qemu/{vmid}/agent/network-get-interfaces"),
            )
            .await?;
        Ok(env.data)
    }

    pub async fn get_vm_agent_info(&self, node: &str, vmid: u32) -> Result<serde_json::Value, PollError> {
        let env: DataEnvelope<serde_json::Value> = self
            .transport
            .get_json(self.upstream(), &format!("api2/json/nodes/{node}/qemu/{vmid}/agent/get-osinfo"))
            .await?;
        Ok(env.data)
    }

    pub async fn get_vm_agent_version(&self, node: &str, vmid: u32) -> Result<PveGuestAgentInfo, PollError> {
        let env: DataEnvelope<PveGuestAgentInfo> = self
            .transport
            .get_json(self.upstream(), &format!("api2/json/nodes/{node}/qemu/{vmid}/agent/info"))
            .await?;
        Ok(env.data)
    }

    pub async fn get_zfs_pool_status(&self, node: &str) -> Result<serde_json::Value, PollError> {
        let env: DataEnvelope<serde_json::Value> = self
            .transport
            .get_json(self.upstream(), &format!("api2/json/nodes/{node}/disks/zfs"))
            .await?;
        Ok(env.data)
    }

    pub async fn get_disks(&self, node: &str) -> Result<Vec<PveDiskEntry>, PollError> {
        let env: DataEnvelope<Vec<PveDiskEntry>> = self
            .transport
            .get_json(self.upstream(), &format!("api2/json/nodes/{node}/disks/list"))
            .await?;
        Ok(env.data)
    }

    pub async fn get_ceph_status(&self, node: &str) -> Result<serde_json::Value, PollError> {
        let env: DataEnvelope<serde_json::Value> = self
            .transport
            .get_json(self.upstream(), &format!("api2/json/nodes/{node}/ceph/status"))
            .await?;
        Ok(env.data)
    }

    pub async fn get_ceph_df(&self, node: &str) -> Result<serde_json::Value, PollError> {
        let env: DataEnvelope<serde_json::Value> = self
            .transport
            .get_json(self.upstream(), &format!("api2/json/nodes/{node}/ceph/df"))
            .await?;
        Ok(env.data)
    }

    /// spec.md §4.4 step 9: "Cluster detection self-healing" probe.
    pub async fn is_cluster_member(&self, node: &str) -> Result<bool, PollError> {
        let env: DataEnvelope<serde_json::Value> = self
            .transport
            .get_json(self.upstream(), &format!("api2/json/nodes/{node}/status"))
            .await?;
        Ok(env
            .data
            .get("cluster-member")
            .and_then(|v| v.as_bool())
            .unwrap_or(false))
    }
}
