//! PMG REST client (spec.md §6 verb list).

use serde::Deserialize;

use super::{DataEnvelope, HttpTransport};
use crate::error::PollError;

#[derive(Debug, Clone, Deserialize)]
pub struct PmgVersion {
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PmgClusterNode {
    pub cid: u32,
    pub hostname: String,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PmgQueueStatus {
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub deferred: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PmgConfigBackupEntry {
    pub filename: String,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PmgMailStatsEntry {
    #[serde(default)]
    pub count_in: Option<u64>,
    #[serde(default)]
    pub count_out: Option<u64>,
    #[serde(default)]
    pub spam_in: Option<u64>,
    #[serde(default)]
    pub virus_in: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PmgSpamScoreBucket {
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub count: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PmgQuarantineStatus {
    #[serde(default)]
    pub spam_count: Option<u64>,
    #[serde(default)]
    pub virus_count: Option<u64>,
}

pub struct PmgClient {
    transport: HttpTransport,
    upstream_name: String,
}

impl PmgClient {
    pub fn new(transport: HttpTransport, upstream_name: impl Into<String>) -> Self {
        Self { transport, upstream_name: upstream_name.into() }
    }

    fn upstream(&self) -> &str {
        &self.upstream_name
    }

    pub async fn get_version(&self) -> Result<PmgVersion, PollError> {
        let env: DataEnvelope<PmgVersion> =
            self.transport.get_json(self.upstream(), "api2/json/version").await?;
        Ok(env.data)
    }

    pub async fn get_cluster_status(&self) -> Result<Vec<PmgClusterNode>, PollError> {
        let env: DataEnvelope<Vec<PmgClusterNode>> =
            self.transport.get_json(self.upstream(), "api2/json/config/cluster/status").await?;
        Ok(env.data)
    }

    pub async fn get_queue_status(&self, node: &str) -> Result<PmgQueueStatus, PollError> {
        let env: DataEnvelope<PmgQueueStatus> = self
            .transport
            .get_json(self.upstream(), &format!("api2/json/nodes/{node}/qshape"))
            .await?;
        Ok(env.data)
    }

    pub async fn list_backups(&self, node: &str) -> Result<Vec<PmgConfigBackupEntry>, PollError> {
        let env: DataEnvelope<Vec<PmgConfigBackupEntry>> = self
            .transport
            .get_json(self.upstream(), &format!("api2/json/nodes/{node}/config/backup"))
            .await?;
        Ok(env.data)
    }

    pub async fn get_mail_statistics(&self, node: &str) -> Result<PmgMailStatsEntry, PollError> {
        let env: DataEnvelope<PmgMailStatsEntry> = self
            .transport
            .get_json(self.upstream(), &format!("api2/json/nodes/{node}/statistics/mail?hours=24"))
            .await?;
        Ok(env.data)
    }

    pub async fn get_mail_count(&self, node: &str) -> Result<u64, PollError> {
        let stats = self.get_mail_statistics(node).await?;
        Ok(stats.count_in.unwrap_or(0) + stats.count_out.unwrap_or(0))
    }

    pub async fn get_spam_scores(&self, node: &str) -> Result<Vec<PmgSpamScoreBucket>, PollError> {
        let env: DataEnvelope<Vec<PmgSpamScoreBucket>> = self
            .transport
            .get_json(self.upstream(), &format!("api2/json/nodes/{node}/statistics/spamscores"))
            .await?;
        Ok(env.data)
    }

    pub async fn get_quarantine_status(&self, node: &str) -> Result<PmgQuarantineStatus, PollError> {
        let env: DataEnvelope<PmgQuarantineStatus> = self
            .transport
            .get_json(self.upstream(), &format!("api2/json/nodes/{node}/quarantine/status"))
            .await?;
        Ok(env.data)
    }
}
