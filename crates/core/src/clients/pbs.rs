//! PBS REST client (spec.md §6 verb list).

use serde::Deserialize;

use super::{DataEnvelope, HttpTransport};
use crate::error::PollError;

#[derive(Debug, Clone, Deserialize)]
pub struct PbsVersion {
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PbsNodeStatus {
    #[serde(default)]
    pub cpu: Option<f64>,
    #[serde(default)]
    pub memory: PbsMemoryInfo,
    #[serde(default)]
    pub uptime: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PbsMemoryInfo {
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub used: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PbsDatastoreEntry {
    pub store: String,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub used: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PbsNamespaceEntry {
    pub ns: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PbsBackupEntry {
    #[serde(rename = "backup-type")]
    pub backup_type: String,
    #[serde(rename = "backup-id")]
    pub backup_id: String,
    #[serde(rename = "backup-time")]
    pub backup_time: i64,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub verification: Option<serde_json::Value>,
}

pub struct PbsClient {
    transport: HttpTransport,
    upstream_name: String,
}

impl PbsClient {
    pub fn new(transport: HttpTransport, upstream_name: impl Into<String>) -> Self {
        Self { transport, upstream_name: upstream_name.into() }
    }

    fn upstream(&self) -> &str {
        &self.upstream_name
    }

    pub async fn get_version(&self) -> Result<PbsVersion, PollError> {
        let env: DataEnvelope<PbsVersion> =
            self.transport.get_json(self.upstream(), "api2/json/version").await?;
        Ok(env.data)
    }

    pub async fn get_node_status(&self, node: &str) -> Result<PbsNodeStatus, PollError> {
        let env: DataEnvelope<PbsNodeStatus> = self
            .transport
            .get_json(self.upstream(), &format!("api2/json/nodes/{node}/status"))
            .await?;
        Ok(env.data)
    }

    pub async fn get_datastores(&self) -> Result<Vec<PbsDatastoreEntry>, PollError> {
        let env: DataEnvelope<Vec<PbsDatastoreEntry>> =
            self.transport.get_json(self.upstream(), "api2/json/status/datastore-usage").await?;
        Ok(env.data)
    }

    pub async fn list_namespaces(&self, datastore: &str) -> Result<Vec<PbsNamespaceEntry>, PollError> {
        let env: DataEnvelope<Vec<PbsNamespaceEntry>> = self
            .transport
            .get_json(self.upstream(), &format!("api2/json/admin/datastore/{datastore}/namespace"))
            .await?;
        Ok(env.data)
    }

    /// Lists backups across every namespace for a datastore, fetched
    /// concurrently with a single-flight guard owned by the PBS poller
    /// (spec.md §4.4 "PBS poller").
    pub async fn list_all_backups(
        &self,
        datastore: &str,
        namespaces: &[String],
    ) -> Result<Vec<(String, Vec<PbsBackupEntry>)>, PollError> {
        let mut out = Vec::with_capacity(namespaces.len());
        for ns in namespaces {
            let path = if ns.is_empty() {
                format!("api2/json/admin/datastore/{datastore}/snapshots")
            } else {
                format!("api2/json/admin/datastore/{datastore}/snapshots?ns={ns}")
            };
            let env: DataEnvelope<Vec<PbsBackupEntry>> =
                self.transport.get_json(self.upstream(), &path).await?;
            out.push((ns.clone(), env.data));
        }
        Ok(out)
    }
}
