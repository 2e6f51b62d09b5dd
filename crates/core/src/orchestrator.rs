//! Monitor Orchestrator (spec.md §4.9, C13): worker pool, poll/broadcast
//! tickers, reconnect loop, cleanup sweepers. Grounded directly on the
//! teacher's `main.rs` `AppState::initialize` + spawned-task +
//! `shutdown_signal` pattern, generalized from "one health-check loop over
//! a fixed agent pool" to "many independently-scheduled upstream pollers
//! draining a shared priority queue" (`AgentPool::health_check_all`'s
//! collect-then-spawn-then-join shape is reused in `run_cleanup_sweep`).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{watch, Semaphore};
use tracing::{debug, info, warn};

use crate::alerts::{AlertEngine, MetricSample};
use crate::clients::{pbs::PbsClient, pmg::PmgClient, pve::PveClient};
use crate::config::Config;
use crate::error::PollError;
use crate::ingest::AgentIngest;
use crate::metrics::CoreMetrics;
use crate::notify::NotificationDispatcher;
use crate::pollers::{self, pbs::PbsPoller, pmg::PmgPoller, pve::PvePoller};
use crate::scheduler::{
    AdaptiveConfig, BreakerConfig, CircuitBreaker, DeadLetterQueue, InstanceDescriptor,
    StalenessTracker, TaskQueue,
};
use crate::state::models::{BreakerState, InstanceKey};
use crate::state::StateStore;
use crate::ws::{Broadcaster, WsMessage};

/// One entry per configured upstream; the orchestrator dispatches on this
/// instead of downcasting trait objects since the three upstream types
/// have genuinely different wire shapes (spec.md §6).
enum UpstreamPoller {
    Pve(PvePoller),
    Pbs { poller: PbsPoller, node_name: String },
    Pmg(PmgPoller),
}

impl UpstreamPoller {
    fn instance_type(&self) -> &'static str {
        match self {
            UpstreamPoller::Pve(_) => "pve",
            UpstreamPoller::Pbs { .. } => "pbs",
            UpstreamPoller::Pmg(_) => "pmg",
        }
    }
}

/// Per-instance backup-poll cadence bookkeeping (spec.md §4.4
/// `shouldRunBackupPoll`); kept outside `PbsPoller` since cadence is an
/// orchestration concern, not a poller one.
#[derive(Default)]
struct BackupCadence {
    cycle_count: u64,
    last_run: Option<i64>,
}

pub struct Orchestrator {
    config: Config,
    state: Arc<StateStore>,
    queue: Arc<TaskQueue>,
    dlq: Arc<DeadLetterQueue>,
    staleness: Arc<StalenessTracker>,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    pollers: HashMap<String, UpstreamPoller>,
    backup_cadence: Mutex<HashMap<String, BackupCadence>>,
    ingest: Arc<AgentIngest>,
    alerts: Arc<AlertEngine>,
    dispatcher: Arc<NotificationDispatcher>,
    broadcaster: Broadcaster,
    metrics: CoreMetrics,
    /// spec.md §4.9 "launch worker pool sized clamp(|upstreams|, 1, 10)".
    worker_permits: Arc<Semaphore>,
    /// spec.md §9 "concurrency cap of 2 concurrent poll-cycle initiators".
    initiator_permits: Arc<Semaphore>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        state: Arc<StateStore>,
        queue: Arc<TaskQueue>,
        dlq: Arc<DeadLetterQueue>,
        staleness: Arc<StalenessTracker>,
        ingest: Arc<AgentIngest>,
        alerts: Arc<AlertEngine>,
        dispatcher: Arc<NotificationDispatcher>,
        broadcaster: Broadcaster,
        metrics: CoreMetrics,
    ) -> anyhow::Result<Self> {
        let breaker_config = if config.polling.adaptive_polling_max_interval_secs <= 15 {
            BreakerConfig::compressed()
        } else {
            BreakerConfig::default()
        };

        let mut pollers = HashMap::new();
        let mut breakers = HashMap::new();
        let timeout = Duration::from_secs(config.polling.connection_timeout_secs);

        for pve in &config.upstreams.pve {
            let transport =
                crate::clients::HttpTransport::new(&pve.host, &pve.auth, pve.verify_ssl, timeout)?;
            let client = PveClient::new(transport, pve.name.clone());
            pollers.insert(pve.name.clone(), UpstreamPoller::Pve(PvePoller::new(client, pve.name.clone())));
            breakers.insert(pve.name.clone(), Arc::new(CircuitBreaker::new(breaker_config)));
        }
        for pbs in &config.upstreams.pbs {
            let transport =
                crate::clients::HttpTransport::new(&pbs.host, &pbs.auth, pbs.verify_ssl, timeout)?;
            let client = PbsClient::new(transport, pbs.name.clone());
            pollers.insert(
                pbs.name.clone(),
                UpstreamPoller::Pbs { poller: PbsPoller::new(client, pbs.name.clone()), node_name: pbs.name.clone() },
            );
            breakers.insert(pbs.name.clone(), Arc::new(CircuitBreaker::new(breaker_config)));
        }
        for pmg in &config.upstreams.pmg {
            let transport =
                crate::clients::HttpTransport::new(&pmg.host, &pmg.auth, pmg.verify_ssl, timeout)?;
            let client = PmgClient::new(transport, pmg.name.clone());
            pollers.insert(pmg.name.clone(), UpstreamPoller::Pmg(PmgPoller::new(client, pmg.name.clone())));
            breakers.insert(pmg.name.clone(), Arc::new(CircuitBreaker::new(breaker_config)));
        }

        let worker_count = pollers.len().clamp(1, 10);

        Ok(Self {
            config,
            state,
            queue,
            dlq,
            staleness,
            breakers: RwLock::new(breakers),
            pollers,
            backup_cadence: Mutex::new(HashMap::new()),
            ingest,
            alerts,
            dispatcher,
            broadcaster,
            metrics,
            worker_permits: Arc::new(Semaphore::new(worker_count)),
            initiator_permits: Arc::new(Semaphore::new(2)),
        })
    }

    fn now_unix() -> i64 {
        chrono::Utc::now().timestamp()
    }

    fn now_unix_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Seeds the task queue with every configured upstream at the base
    /// adaptive interval, then runs the scheduler/worker/broadcast/cleanup
    /// loops until `shutdown_rx` reports true.
    pub async fn run(self: Arc<Self>, shutdown_rx: watch::Receiver<bool>) {
        let now = Self::now_unix();
        for (name, poller) in &self.pollers {
            self.queue.upsert(crate::state::models::ScheduledTask {
                instance_type: poller.instance_type().to_string(),
                instance_name: name.clone(),
                interval_secs: self.config.polling.adaptive_polling_base_interval_secs,
                next_run: now,
            });
        }

        let dispatch = tokio::spawn(self.clone().run_dispatch_loop(shutdown_rx.clone()));
        let broadcast = tokio::spawn(self.clone().run_broadcast_loop(shutdown_rx.clone()));
        let cleanup = tokio::spawn(self.clone().run_cleanup_loop(shutdown_rx.clone()));

        let _ = tokio::join!(dispatch, broadcast, cleanup);
        info!("orchestrator loops stopped");
    }

    /// Pops due tasks and spawns one worker per task, bounded by
    /// `worker_permits` (spec.md §4.9 "parallel worker pool over a shared
    /// blocking priority queue").
    async fn run_dispatch_loop(self: Arc<Self>, shutdown_rx: watch::Receiver<bool>) {
        loop {
            let task = self.queue.wait_next(Self::now_unix, &shutdown_rx).await;
            let Some(task) = task else { break };

            let Ok(permit) = self.worker_permits.clone().acquire_owned().await else { break };
            let this = self.clone();
            tokio::spawn(async move {
                this.run_one_cycle(task).await;
                drop(permit);
            });
        }
        debug!("dispatch loop stopped");
    }

    /// Runs a single poll for one instance: breaker gate, poll, apply to
    /// state, re-evaluate alerts, reschedule. Bounded additionally by
    /// `initiator_permits` (spec.md §9's 2-concurrent-initiators cap —
    /// "extras drop with debug log" when the pool is saturated).
    async fn run_one_cycle(&self, task: crate::state::models::ScheduledTask) {
        let permit = match self.initiator_permits.clone().try_acquire_owned() {
            Ok(p) => p,
            Err(_) => {
                debug!(instance = %task.instance_name, "poll-cycle initiator pool saturated, dropping this tick");
                self.reschedule(&task);
                return;
            }
        };

        let now = Self::now_unix();
        let breaker = self.breaker_for(&task.instance_name);
        if !breaker.allow(now) {
            debug!(instance = %task.instance_name, "circuit breaker open, skipping poll");
            self.reschedule(&task);
            drop(permit);
            return;
        }

        let Some(poller) = self.pollers.get(&task.instance_name) else {
            drop(permit);
            return;
        };
        let instance_type = poller.instance_type();

        let result = self.poll_once(poller, &task.instance_name, now).await;
        self.metrics.poll_completed(&task.instance_name, result.is_ok());
        let health_key = crate::state::models::connection_health_key(instance_type, &task.instance_name);

        match result {
            Ok(_changed) => {
                breaker.record_success(now);
                self.state.set_connection_health(&health_key, true);
                self.dlq.remove(&InstanceKey::new(instance_type, task.instance_name.clone()));
                self.reevaluate_alerts(&task.instance_name, now).await;
            }
            Err(err) => {
                if err.counts_against_breaker() {
                    breaker.record_failure(now);
                }
                self.staleness.record_error(&task.instance_name, now);
                self.state.set_connection_health(&health_key, false);
                warn!(instance = %task.instance_name, error = %err, "poll failed");
                if err.is_dlq_eligible() && breaker.snapshot().state == BreakerState::Open {
                    self.dlq.route(
                        InstanceKey::new(instance_type, task.instance_name.clone()),
                        err.to_string(),
                        now,
                    );
                }
            }
        }

        self.reschedule(&task);
        drop(permit);
    }

    async fn poll_once(&self, poller: &UpstreamPoller, instance: &str, now: i64) -> Result<bool, PollError> {
        match poller {
            UpstreamPoller::Pve(p) => {
                let outcome = p.poll(Self::now_unix_ms()).await?;
                let changed = self.staleness.record_success(instance, now, &outcome.guests);
                self.state.update_nodes_for_instance(instance, outcome.nodes);
                self.state.update_guests_for_instance(instance, outcome.guests);
                self.state.update_storage_for_instance(instance, outcome.storage);
                self.state.update_storage_backups_for_instance(instance, outcome.storage_backups);
                self.state.update_guest_snapshots_for_instance(instance, outcome.guest_snapshots);
                self.state.update_replication_jobs_for_instance(instance, outcome.replication_jobs);
                self.state.update_physical_disks_for_instance(instance, outcome.physical_disks);
                Ok(changed)
            }
            UpstreamPoller::Pbs { poller, node_name } => {
                let outcome = poller.poll(node_name).await?;
                let changed = self.staleness.record_success(instance, now, &outcome.datastores);
                self.state.update_nodes_for_instance(instance, vec![outcome.node]);
                self.state.update_datastores_for_instance(instance, outcome.datastores.clone());
                if !outcome.backups.is_empty() {
                    self.state.update_pbs_backups_for_instance(instance, outcome.backups);
                }
                self.maybe_poll_backups(poller, instance, &outcome.datastores, now).await;
                Ok(changed)
            }
            UpstreamPoller::Pmg(p) => {
                let stats = p.poll().await?;
                let changed = self.staleness.record_success(instance, now, &stats);
                self.state.update_pmg_mail_stats_for_instance(instance, stats);
                Ok(changed)
            }
        }
    }

    /// spec.md §4.4 `shouldRunBackupPoll`: backups are listed on their own,
    /// slower cadence than the base poll. Namespace support is limited to
    /// the root namespace here — a full per-namespace sweep would need the
    /// PBS client threaded through the orchestrator rather than owned by
    /// the poller.
    async fn maybe_poll_backups(
        &self,
        poller: &PbsPoller,
        instance: &str,
        datastores: &[crate::state::models::Datastore],
        now: i64,
    ) {
        if !self.config.polling.enable_backup_polling {
            return;
        }
        let cycle_count = {
            let mut cadence = self.backup_cadence.lock();
            let entry = cadence.entry(instance.to_string()).or_default();
            entry.cycle_count += 1;
            entry.cycle_count
        };
        let decision = pollers::should_run_backup_poll(
            self.config.polling.backup_polling_interval_secs,
            now,
            self.backup_cadence.lock().get(instance).and_then(|c| c.last_run),
            cycle_count,
            self.config.polling.backup_polling_cycles,
        );
        if decision != pollers::PollCadenceDecision::Run {
            return;
        }

        // spec.md §4.4 "PBS poller": datastores are listed concurrently, not
        // one at a time; `PbsPoller::poll_backups`'s internal single-flight
        // lock still serializes actual requests per instance.
        let listings = futures::future::join_all(datastores.iter().map(|ds| {
            let name = ds.name.clone();
            async move {
                let result = poller.poll_backups(&name, std::slice::from_ref(&String::new())).await;
                (name, result)
            }
        }))
        .await;

        let mut all_backups = Vec::new();
        for (name, result) in listings {
            match result {
                Ok(backups) => all_backups.extend(backups),
                Err(err) => warn!(instance, datastore = %name, error = %err, "backup listing failed"),
            }
        }
        if !all_backups.is_empty() {
            self.state.update_pbs_backups_for_instance(instance, all_backups);
        }
        if let Some(entry) = self.backup_cadence.lock().get_mut(instance) {
            entry.last_run = Some(now);
        }
    }

    fn breaker_for(&self, instance: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .read()
            .get(instance)
            .cloned()
            .unwrap_or_else(|| Arc::new(CircuitBreaker::new(BreakerConfig::default())))
    }

    fn reschedule(&self, task: &crate::state::models::ScheduledTask) {
        let breaker = self.breaker_for(&task.instance_name);
        let staleness = self.staleness.snapshot(&task.instance_name);
        let descriptor = InstanceDescriptor {
            name: task.instance_name.clone(),
            instance_type: task.instance_type.clone(),
            last_interval_secs: task.interval_secs,
            last_scheduled: task.next_run,
            last_success: staleness.last_success,
            last_failure: staleness.last_error,
            breaker_state: breaker.snapshot().state,
            recent_change_count: 0,
        };
        let config = AdaptiveConfig {
            base_interval_secs: self.config.polling.adaptive_polling_base_interval_secs,
            min_interval_secs: self.config.polling.adaptive_polling_min_interval_secs,
            max_interval_secs: self.config.polling.adaptive_polling_max_interval_secs,
            queue_soft_limit: self.pollers.len() * 4,
        };
        let now = Self::now_unix();
        let planned = if self.config.polling.adaptive_polling_enabled {
            crate::scheduler::plan(std::slice::from_ref(&descriptor), self.queue.size(), config, now)
        } else {
            vec![crate::state::models::ScheduledTask {
                instance_type: task.instance_type.clone(),
                instance_name: task.instance_name.clone(),
                interval_secs: self.config.polling.fixed_interval_secs,
                next_run: now + self.config.polling.fixed_interval_secs as i64,
            }]
        };
        for t in planned {
            self.queue.upsert(t);
        }
    }

    /// Re-evaluates node/guest metrics against the alert config and fans out
    /// raised/resolved alerts to the notification dispatcher and WS clients.
    async fn reevaluate_alerts(&self, instance: &str, now: i64) {
        for node in self.state.nodes_for_instance(instance) {
            self.evaluate_and_notify(&node.id, &node.name, "cpu", &node.name, instance, node.cpu * 100.0, false, now);
            self.evaluate_and_notify(&node.id, &node.name, "memory", &node.name, instance, node.memory.usage_percent, false, now);
            self.evaluate_and_notify(&node.id, &node.name, "disk", &node.name, instance, node.disk.usage_percent, false, now);
        }
        for guest in self.state.guests_for_instance(instance) {
            self.evaluate_and_notify(&guest.id, &guest.name, "cpu", &guest.node, instance, guest.cpu * 100.0, true, now);
            self.evaluate_and_notify(&guest.id, &guest.name, "memory", &guest.node, instance, guest.memory.usage_percent, true, now);
            self.evaluate_and_notify(&guest.id, &guest.name, "disk", &guest.node, instance, guest.disk.usage_percent, true, now);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn evaluate_and_notify(
        &self,
        resource_id: &str,
        resource_name: &str,
        metric: &str,
        node: &str,
        instance: &str,
        value: f64,
        is_guest: bool,
        now: i64,
    ) {
        let sample = MetricSample {
            resource_id,
            resource_name,
            metric,
            node: (!node.is_empty()).then_some(node),
            instance,
            value,
            is_guest,
            tags: &[],
        };
        let Some(id) = self.alerts.evaluate(&sample, now) else { return };

        if let Some(alert) = self.alerts.active_alerts().into_iter().find(|a| a.id == id) {
            self.state.upsert_active_alert(alert.clone());
            self.metrics.alert_raised();
            self.broadcaster.send(WsMessage::Alert { data: Box::new(alert.clone()), timestamp: now * 1000 });
            self.dispatcher.queue_alert(alert, now);
        } else {
            self.state.resolve_alert(&id);
            self.metrics.alert_resolved();
            self.broadcaster.send(WsMessage::AlertResolved { id: id.clone(), timestamp: now * 1000 });
            self.dispatcher.cancel_alert(&id);
        }
    }

    /// spec.md §4.9 "broadcast ticker (default 10s)".
    async fn run_broadcast_loop(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(10));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = self.state.snapshot();
                    self.broadcaster.send(WsMessage::Snapshot {
                        data: Box::new(snapshot),
                        timestamp: Self::now_unix_ms(),
                    });
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("broadcast loop stopped");
    }

    /// spec.md §4.9 "cleanup sweepers (removed-host blocklist, DLQ metrics,
    /// connection health)" and the Docker host health-window evaluation
    /// (spec.md §4.6), grounded on `AgentPool::health_check_all`'s
    /// collect-then-spawn-then-join shape (no network calls here, so it
    /// collapses to a plain sweep per tick).
    async fn run_cleanup_loop(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        let interval = Duration::from_secs(self.config.discovery.blocklist_sweep_interval_secs.max(1));
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.run_cleanup_sweep(),
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("cleanup loop stopped");
    }

    fn run_cleanup_sweep(&self) {
        let now = Self::now_unix();
        self.ingest.sweep_expired(now);

        for (host_id, went_offline) in self.ingest.evaluate_health(&self.state, now) {
            debug!(host_id = %host_id, offline = went_offline, "docker host health transition");
            self.evaluate_and_notify(
                &format!("docker-{host_id}"),
                &host_id,
                "docker-host-offline",
                "",
                "docker",
                if went_offline { 1.0 } else { 0.0 },
                false,
                now,
            );
        }

        let present: HashSet<String> = self.state.all_node_names().into_iter().collect();
        self.alerts.cleanup_for_nodes(&present);
        self.state.cleanup_alerts_for_nodes(&present);

        let known_hosts: HashSet<String> = self.state.all_docker_hosts().into_iter().map(|h| h.id).collect();
        self.alerts.prune_stale_docker_alerts(&known_hosts);
        self.state.prune_stale_docker_alerts();

        for due in self.dlq.due(now) {
            debug!(key = %due.key, retry_count = due.retry_count, "dlq entry due for retry, re-queuing");
            self.queue.upsert(crate::state::models::ScheduledTask {
                instance_type: due.key.instance_type.clone(),
                instance_name: due.key.instance_name.clone(),
                interval_secs: self.config.polling.adaptive_polling_base_interval_secs,
                next_run: now,
            });
            self.dlq.remove(&due.key);
        }

        self.metrics.poll_completed("cleanup-sweep", true);
    }
}
