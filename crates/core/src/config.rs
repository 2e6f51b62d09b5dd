use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub polling: PollingConfig,
    pub upstreams: UpstreamsConfig,
    pub alerts: AlertScheduleConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub bind_address: String,
    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,
    pub enable_cors: bool,
    pub cors_origins: Vec<String>,
}

/// Global adaptive-polling and backup-polling settings (spec.md §6).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PollingConfig {
    pub adaptive_polling_enabled: bool,
    pub adaptive_polling_base_interval_secs: u64,
    pub adaptive_polling_min_interval_secs: u64,
    pub adaptive_polling_max_interval_secs: u64,
    /// Fallback fixed interval used when adaptive polling is disabled.
    pub fixed_interval_secs: u64,
    pub connection_timeout_secs: u64,
    pub enable_backup_polling: bool,
    /// `None` defers to `backup_polling_cycles`.
    pub backup_polling_interval_secs: Option<u64>,
    /// Run backup polling every N poll cycles. 0 means disabled (see
    /// SPEC_FULL.md §E.1 for the Open Question resolution).
    pub backup_polling_cycles: u32,
    pub physical_disk_polling_minutes: u64,
    pub public_url: Option<String>,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            adaptive_polling_enabled: true,
            adaptive_polling_base_interval_secs: 30,
            adaptive_polling_min_interval_secs: 10,
            adaptive_polling_max_interval_secs: 120,
            fixed_interval_secs: 10,
            connection_timeout_secs: 10,
            enable_backup_polling: true,
            backup_polling_interval_secs: None,
            backup_polling_cycles: 6,
            physical_disk_polling_minutes: 5,
            public_url: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct UpstreamsConfig {
    #[serde(default)]
    pub pve: Vec<PveUpstreamConfig>,
    #[serde(default)]
    pub pbs: Vec<PbsUpstreamConfig>,
    #[serde(default)]
    pub pmg: Vec<PmgUpstreamConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    pub user: Option<String>,
    pub token_id: Option<String>,
    pub token_secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClusterEndpointConfig {
    pub url: String,
    pub node_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PveUpstreamConfig {
    pub name: String,
    pub host: String,
    #[serde(default)]
    pub is_cluster: bool,
    #[serde(default)]
    pub cluster_endpoints: Vec<ClusterEndpointConfig>,
    pub auth: AuthConfig,
    #[serde(default = "default_true")]
    pub verify_ssl: bool,
    #[serde(default = "default_true")]
    pub monitor_vms: bool,
    #[serde(default = "default_true")]
    pub monitor_containers: bool,
    #[serde(default = "default_true")]
    pub monitor_storage: bool,
    #[serde(default = "default_true")]
    pub monitor_backups: bool,
    #[serde(default)]
    pub monitor_physical_disks: bool,
    #[serde(default)]
    pub physical_disk_polling_minutes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PbsUpstreamConfig {
    pub name: String,
    pub host: String,
    pub auth: AuthConfig,
    #[serde(default = "default_true")]
    pub verify_ssl: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PmgUpstreamConfig {
    pub name: String,
    pub host: String,
    pub auth: AuthConfig,
    #[serde(default = "default_true")]
    pub verify_ssl: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GroupingConfig {
    pub window_secs: u64,
    pub by_node: bool,
    pub by_guest: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EscalationLevel {
    pub delay_secs: u64,
    /// `email` | `webhook` | `all`
    pub notify: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AlertScheduleConfig {
    pub cooldown_minutes: u64,
    pub grouping: GroupingConfig,
    #[serde(default)]
    pub escalation_levels: Vec<EscalationLevel>,
    /// `{title}`/`{body}` URL template for the built-in `WebhookSink`
    /// (spec.md §4.8/§6). Unset means only `LoggingSink` is active.
    #[serde(default)]
    pub webhook_url_template: Option<String>,
}

impl Default for AlertScheduleConfig {
    fn default() -> Self {
        Self {
            cooldown_minutes: 15,
            grouping: GroupingConfig { window_secs: 30, by_node: true, by_guest: true },
            escalation_levels: vec![],
            webhook_url_template: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub output: LogOutput,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    Stdout,
    File { path: String },
}

/// Agent auto-enrollment / discovery knobs for push-ingest hosts.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub discovery_enabled: bool,
    /// How long a deliberately-removed Docker host ID stays blocked.
    pub removal_blocklist_ttl_secs: u64,
    /// How often the blocklist sweeper runs.
    pub blocklist_sweep_interval_secs: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            discovery_enabled: true,
            removal_blocklist_ttl_secs: 24 * 3600,
            blocklist_sweep_interval_secs: 3600,
        }
    }
}

impl Config {
    /// Load configuration from `config/pulsewatch.toml` (or the
    /// `/etc/pulsewatch/pulsewatch.toml` production location) layered with
    /// `PULSEWATCH__`-prefixed environment variables.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = config::Config::try_from(&Config::default())
            .context("failed to serialize default configuration")?;

        let mut builder = config::Config::builder().add_source(defaults);

        let config_paths = [
            "/etc/pulsewatch/pulsewatch",
            "config/pulsewatch",
            "crates/core/config/pulsewatch",
        ];
        for path in config_paths {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("PULSEWATCH")
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .context("failed to build configuration")?
            .try_deserialize()
            .context("failed to deserialize configuration")
    }

    pub fn validate(&self) -> Result<()> {
        self.server
            .bind_address
            .parse::<std::net::SocketAddr>()
            .context("invalid bind_address")?;

        let p = &self.polling;
        anyhow::ensure!(
            p.adaptive_polling_min_interval_secs <= p.adaptive_polling_base_interval_secs
                && p.adaptive_polling_base_interval_secs <= p.adaptive_polling_max_interval_secs,
            "adaptive polling bounds must satisfy min <= base <= max"
        );

        for pve in &self.upstreams.pve {
            if pve.is_cluster && pve.cluster_endpoints.is_empty() {
                anyhow::bail!("upstream '{}' is_cluster=true but has no cluster_endpoints", pve.name);
            }
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind_address: "0.0.0.0:8080".to_string(),
                read_timeout_secs: 30,
                write_timeout_secs: 30,
                enable_cors: true,
                cors_origins: vec![
                    "http://localhost:3000".to_string(),
                    "http://localhost:5173".to_string(),
                ],
            },
            polling: PollingConfig::default(),
            upstreams: UpstreamsConfig::default(),
            alerts: AlertScheduleConfig::default(),
            logging: LoggingConfig {
                level: "info,pulsewatch_core=debug".to_string(),
                format: LogFormat::Pretty,
                output: LogOutput::Stdout,
            },
            discovery: DiscoveryConfig::default(),
        }
    }
}

/// Stand-in type kept for serde round-tripping of label maps attached to
/// discovered agents; not otherwise interpreted by the core.
pub type LabelMap = HashMap<String, String>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        Config::default().validate().expect("default config must validate");
    }

    #[test]
    fn rejects_inverted_interval_bounds() {
        let mut cfg = Config::default();
        cfg.polling.adaptive_polling_min_interval_secs = 200;
        cfg.polling.adaptive_polling_max_interval_secs = 100;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_cluster_without_endpoints() {
        let mut cfg = Config::default();
        cfg.upstreams.pve.push(PveUpstreamConfig {
            name: "prod".into(),
            host: "https://pve1:8006".into(),
            is_cluster: true,
            cluster_endpoints: vec![],
            auth: AuthConfig { user: None, token_id: None, token_secret: None },
            verify_ssl: true,
            monitor_vms: true,
            monitor_containers: true,
            monitor_storage: true,
            monitor_backups: true,
            monitor_physical_disks: false,
            physical_disk_polling_minutes: None,
        });
        assert!(cfg.validate().is_err());
    }
}
