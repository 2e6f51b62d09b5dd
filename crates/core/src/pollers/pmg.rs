//! PMG poller (spec.md §4.4 "PMG poller"): version + cluster status, and
//! per-node queue/backup/mail-statistics/spam/quarantine aggregation.

use crate::clients::pmg::PmgClient;
use crate::error::PollError;
use crate::state::models::{PmgConfigBackup, PmgMailStats};

pub struct PmgPoller {
    client: PmgClient,
    instance: String,
}

impl PmgPoller {
    pub fn new(client: PmgClient, instance: impl Into<String>) -> Self {
        Self { client, instance: instance.into() }
    }

    pub async fn poll(&self) -> Result<Vec<PmgMailStats>, PollError> {
        let _version = self.client.get_version().await?;
        let cluster_nodes = self.client.get_cluster_status().await?;

        let mut out = Vec::with_capacity(cluster_nodes.len());
        for node in &cluster_nodes {
            let queue = self.client.get_queue_status(&node.hostname).await.unwrap_or_default();
            let mail = self.client.get_mail_statistics(&node.hostname).await.unwrap_or_default();
            let spam_scores = self.client.get_spam_scores(&node.hostname).await.unwrap_or_default();
            let quarantine = self.client.get_quarantine_status(&node.hostname).await.unwrap_or_default();
            let backups = self.client.list_backups(&node.hostname).await.unwrap_or_default();

            out.push(PmgMailStats {
                instance: self.instance.clone(),
                node: node.hostname.clone(),
                queue_length: queue.total.unwrap_or(0),
                mail_in_24h: mail.count_in.unwrap_or(0),
                mail_out_24h: mail.count_out.unwrap_or(0),
                spam_in_24h: mail.spam_in.unwrap_or(0),
                virus_in_24h: mail.virus_in.unwrap_or(0),
                quarantine_spam_count: quarantine.spam_count.unwrap_or(0),
                quarantine_virus_count: quarantine.virus_count.unwrap_or(0),
                spam_score_distribution: spam_scores.iter().map(|b| b.count.unwrap_or(0)).collect(),
                config_backups: backups
                    .into_iter()
                    .map(|b| PmgConfigBackup { filename: b.filename, timestamp: b.timestamp.unwrap_or(0) })
                    .collect(),
            });
        }

        Ok(out)
    }
}
