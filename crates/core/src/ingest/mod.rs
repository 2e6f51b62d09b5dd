//! Agent Ingest (spec.md §4.6, C10): push-report identity resolution,
//! removal blocklist, and command lifecycle for Docker/host agents.
//!
//! The periodic blocklist sweep is grounded on the teacher's
//! `AgentRegistry::start_health_monitoring` interval-ticker shape.

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::error::ApiError;
use crate::state::models::{CommandStatus, CommandType, DockerHost, DockerHostCommand, DockerHostStatus};
use crate::state::StateStore;
use crate::util::fnv1a64;

#[derive(Debug, Clone, Default)]
pub struct AgentIdentity {
    pub agent_id: Option<String>,
    pub token_id: Option<String>,
    pub machine_id: Option<String>,
    pub hostname: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AgentReport {
    pub identity: AgentIdentity,
    pub agent_version: String,
    pub interval_seconds: u64,
    pub hostname: String,
    pub os: String,
    pub kernel: String,
    pub arch: String,
    pub containers: Vec<crate::state::models::DockerContainer>,
}

struct BlockedHost {
    removed_at: i64,
    legacy_ids: Vec<String>,
}

/// Removed-host blocklist + active-command bookkeeping. State is
/// process-scoped, encapsulated here per spec.md §9's note on global
/// mutable state: init on construction, explicit teardown never required
/// since it's dropped with the orchestrator.
pub struct AgentIngest {
    blocklist: RwLock<HashMap<String, BlockedHost>>,
    blocklist_ttl_secs: i64,
}

impl AgentIngest {
    pub fn new(blocklist_ttl_secs: i64) -> Self {
        Self { blocklist: RwLock::new(HashMap::new()), blocklist_ttl_secs }
    }

    /// spec.md §4.6: removed host IDs (and any legacy IDs they also
    /// responded to) are rejected until re-enrollment or 24h TTL expiry.
    pub fn block_host(&self, host_id: &str, legacy_ids: Vec<String>, now_unix: i64) {
        self.blocklist
            .write()
            .insert(host_id.to_string(), BlockedHost { removed_at: now_unix, legacy_ids });
    }

    pub fn allow_reenroll(&self, host_id: &str) {
        self.blocklist.write().remove(host_id);
    }

    fn is_blocked(&self, host_id: &str, now_unix: i64) -> bool {
        let mut blocklist = self.blocklist.write();
        let mut expired = None;
        let blocked = blocklist.iter().find(|(id, b)| {
            (*id == host_id || b.legacy_ids.iter().any(|l| l == host_id))
                && now_unix - b.removed_at < self.blocklist_ttl_secs
        });
        let is_blocked = blocked.is_some();
        if !is_blocked {
            if let Some((id, b)) = blocklist.iter().find(|(id, b)| {
                (*id == host_id || b.legacy_ids.iter().any(|l| l == host_id))
                    && now_unix - b.removed_at >= self.blocklist_ttl_secs
            }) {
                expired = Some((id.clone(), b.removed_at));
            }
        }
        if let Some((id, _)) = expired {
            blocklist.remove(&id);
        }
        is_blocked
    }

    /// spec.md §4.6 "Deliberate-removal blocklist": sweep expired entries.
    /// Grounded on the teacher's periodic interval-ticker sweep shape.
    pub fn sweep_expired(&self, now_unix: i64) {
        self.blocklist.write().retain(|_, b| now_unix - b.removed_at < self.blocklist_ttl_secs);
    }

    /// Identity resolution priority chain (spec.md §4.6).
    pub fn resolve_identity(&self, store: &StateStore, identity: &AgentIdentity) -> String {
        if let Some(agent_id) = &identity.agent_id {
            if let Some(host) = store.find_docker_host(|h| h.agent_id.as_deref() == Some(agent_id)) {
                return host.id;
            }
        }
        if let Some(token_id) = &identity.token_id {
            if let Some(host) = store.find_docker_host(|h| h.token_id.as_deref() == Some(token_id)) {
                return host.id;
            }
        }
        if let (Some(machine_id), Some(hostname)) = (&identity.machine_id, &identity.hostname) {
            if let Some(host) = store.find_docker_host(|h| {
                h.machine_id.as_deref() == Some(machine_id)
                    && &h.hostname == hostname
                    && h.token_id.is_none() == identity.token_id.is_none()
            }) {
                return host.id;
            }
        }
        if let Some(machine_id) = &identity.machine_id {
            if let Some(host) =
                store.find_docker_host(|h| h.machine_id.as_deref() == Some(machine_id) && h.token_id.is_none())
            {
                return host.id;
            }
        }
        if let Some(hostname) = &identity.hostname {
            if let Some(host) = store.find_docker_host(|h| &h.hostname == hostname && h.token_id.is_none()) {
                return host.id;
            }
        }

        self.synthesize_id(store, identity)
    }

    fn synthesize_id(&self, store: &StateStore, identity: &AgentIdentity) -> String {
        let base = identity
            .machine_id
            .clone()
            .or_else(|| identity.hostname.clone())
            .unwrap_or_else(|| "unknown-host".to_string());

        if store.get_docker_host(&base).is_none() {
            return base;
        }

        for candidate in [
            &identity.token_id,
            &identity.agent_id,
            &identity.machine_id,
            &identity.hostname,
            &identity.display_name,
        ] {
            if let Some(suffix) = candidate {
                let sanitized: String =
                    suffix.chars().filter(|c| c.is_ascii_alphanumeric() || *c == '-').collect();
                let candidate_id = format!("{base}-{sanitized}");
                if store.get_docker_host(&candidate_id).is_none() {
                    return candidate_id;
                }
            }
        }

        let hash_input = format!("{base}{:?}", identity.hostname);
        let hash = fnv1a64(hash_input.as_bytes());
        format!("{base}-{:012x}", hash & 0xffff_ffff_ffff)
    }

    /// Accepts or rejects a push report, returning the resolved host ID on
    /// success. Never mutates state on rejection (spec.md §7 "Validation").
    pub fn accept_report(
        &self,
        store: &StateStore,
        report: &AgentReport,
        now_unix: i64,
    ) -> Result<String, ApiError> {
        let host_id = self.resolve_identity(store, &report.identity);
        if self.is_blocked(&host_id, now_unix) {
            return Err(ApiError::HostRemoved(format!(
                "docker host \"{host_id}\" was removed at a prior time and is still within its re-enrollment blackout"
            )));
        }

        let mut host = store.get_docker_host(&host_id).unwrap_or(DockerHost {
            id: host_id.clone(),
            agent_id: report.identity.agent_id.clone(),
            hostname: report.hostname.clone(),
            display_name: report.identity.display_name.clone().unwrap_or_else(|| report.hostname.clone()),
            machine_id: report.identity.machine_id.clone(),
            token_id: report.identity.token_id.clone(),
            status: DockerHostStatus::Online,
            last_seen: now_unix,
            interval_seconds: report.interval_seconds,
            agent_version: report.agent_version.clone(),
            containers: Vec::new(),
            pending_uninstall: false,
            hidden: false,
            command: None,
        });

        host.last_seen = now_unix;
        host.status = DockerHostStatus::Online;
        host.agent_version = report.agent_version.clone();
        host.interval_seconds = report.interval_seconds;
        host.containers = report.containers.clone();
        if host.token_id.is_none() {
            host.token_id = report.identity.token_id.clone();
        }

        self.advance_command(&mut host, now_unix);

        store.upsert_docker_host(host);
        Ok(host_id)
    }

    /// spec.md §4.6 "Command lifecycle": `queued -> dispatched` on next
    /// report delivery.
    fn advance_command(&self, host: &mut DockerHost, now_unix: i64) {
        if let Some(cmd) = host.command.as_mut() {
            if cmd.status == CommandStatus::Queued {
                cmd.status = CommandStatus::Dispatched;
                cmd.updated_at = now_unix;
            }
        }
    }

    /// spec.md §4.6: `acknowledged -> completed|failed` via the ack
    /// endpoint. Completing a stop-preceding-removal command fully removes
    /// the host.
    pub fn acknowledge_command(
        &self,
        store: &StateStore,
        host_id: &str,
        status: CommandStatus,
        now_unix: i64,
    ) -> Result<(), ApiError> {
        let mut host = store
            .get_docker_host(host_id)
            .ok_or_else(|| ApiError::UpstreamNotFound(format!("docker host {host_id}")))?;

        let Some(cmd) = host.command.as_mut() else {
            return Err(ApiError::InvalidRequest(format!("no active command for host {host_id}")));
        };
        cmd.status = status;
        cmd.updated_at = now_unix;

        let remove_host = status == CommandStatus::Completed && cmd.command_type == CommandType::QueueStop;
        if remove_host {
            store.remove_docker_host(host_id);
            self.block_host(host_id, Vec::new(), now_unix);
        } else {
            store.upsert_docker_host(host);
        }
        Ok(())
    }

    pub fn queue_stop(&self, store: &StateStore, host_id: &str, now_unix: i64) -> Result<(), ApiError> {
        let mut host = store
            .get_docker_host(host_id)
            .ok_or_else(|| ApiError::UpstreamNotFound(format!("docker host {host_id}")))?;
        host.command = Some(DockerHostCommand {
            id: format!("{host_id}-stop-{now_unix}"),
            host_id: host_id.to_string(),
            command_type: CommandType::QueueStop,
            payload: serde_json::Value::Null,
            status: CommandStatus::Queued,
            created_at: now_unix,
            updated_at: now_unix,
        });
        store.upsert_docker_host(host);
        Ok(())
    }

    /// spec.md §4.6 "Health evaluation": run every poll tick; transitions
    /// raise/clear the `docker-host-offline` alert via the returned list of
    /// `(hostId, becameOffline)` transitions for the caller to act on.
    pub fn evaluate_health(&self, store: &StateStore, now_unix: i64) -> Vec<(String, bool)> {
        let mut transitions = Vec::new();
        for mut host in store.all_docker_hosts() {
            let healthy = host.is_healthy(now_unix);
            let was_online = host.status == DockerHostStatus::Online;
            if healthy != was_online {
                host.status = if healthy { DockerHostStatus::Online } else { DockerHostStatus::Offline };
                transitions.push((host.id.clone(), !healthy));
                store.upsert_docker_host(host);
            }
        }
        transitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(hostname: &str) -> AgentReport {
        AgentReport {
            identity: AgentIdentity {
                agent_id: Some("a1".to_string()),
                token_id: None,
                machine_id: Some("m1".to_string()),
                hostname: Some(hostname.to_string()),
                display_name: None,
            },
            agent_version: "1.0.0".to_string(),
            interval_seconds: 15,
            hostname: hostname.to_string(),
            os: "linux".to_string(),
            kernel: "6.0".to_string(),
            arch: "x86_64".to_string(),
            containers: Vec::new(),
        }
    }

    #[test]
    fn first_report_synthesizes_id_from_machine_id() {
        let store = StateStore::new();
        let ingest = AgentIngest::new(24 * 3600);
        let id = ingest.accept_report(&store, &report("host1"), 0).unwrap();
        assert_eq!(id, "m1");
    }

    #[test]
    fn second_report_matches_by_agent_id() {
        let store = StateStore::new();
        let ingest = AgentIngest::new(24 * 3600);
        let id1 = ingest.accept_report(&store, &report("host1"), 0).unwrap();
        let id2 = ingest.accept_report(&store, &report("host1"), 10).unwrap();
        assert_eq!(id1, id2);
    }

    #[test]
    fn removed_host_is_rejected_until_ttl_expiry() {
        let store = StateStore::new();
        let ingest = AgentIngest::new(3600);
        let id = ingest.accept_report(&store, &report("host1"), 0).unwrap();
        ingest.block_host(&id, Vec::new(), 0);

        let rejected = ingest.accept_report(&store, &report("host1"), 100);
        assert!(rejected.is_err());

        let accepted = ingest.accept_report(&store, &report("host1"), 4000);
        assert!(accepted.is_ok());
    }

    #[test]
    fn explicit_reenroll_allows_immediate_retry() {
        let store = StateStore::new();
        let ingest = AgentIngest::new(24 * 3600);
        let id = ingest.accept_report(&store, &report("host1"), 0).unwrap();
        ingest.block_host(&id, Vec::new(), 0);
        ingest.allow_reenroll(&id);
        let accepted = ingest.accept_report(&store, &report("host1"), 1);
        assert!(accepted.is_ok());
    }

    #[test]
    fn health_window_evaluates_offline_after_gap() {
        let store = StateStore::new();
        let ingest = AgentIngest::new(24 * 3600);
        ingest.accept_report(&store, &report("host1"), 0).unwrap();
        let transitions = ingest.evaluate_health(&store, 10_000);
        assert_eq!(transitions.len(), 1);
        assert!(transitions[0].1);
    }
}
