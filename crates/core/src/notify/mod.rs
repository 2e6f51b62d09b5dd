//! Notification Dispatcher (spec.md §4.8, C12): cooldown + grouping-window
//! engine over a set of sinks, new logic specific to this domain.

pub mod sinks;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::config::GroupingConfig;
use crate::state::models::Alert;
use sinks::{NotificationKind, NotificationPayload, NotificationSink};

fn grouping_key(alert: &Alert, config: &GroupingConfig) -> String {
    let mut parts = Vec::new();
    if config.by_node {
        parts.push(alert.node.clone().unwrap_or_default());
    }
    if config.by_guest {
        parts.push(alert.resource_id.clone());
    }
    if parts.is_empty() {
        "default".to_string()
    } else {
        parts.join("/")
    }
}

struct PendingGroup {
    alerts: HashMap<String, Alert>,
    first_queued_at: i64,
}

struct Inner {
    cooldown_secs: i64,
    grouping: GroupingConfig,
    /// `alertId -> (lastSentAt, startTimeAtLastSend)`.
    cooldowns: Mutex<HashMap<String, (i64, i64)>>,
    pending: Mutex<HashMap<String, PendingGroup>>,
    sinks: Vec<Arc<dyn NotificationSink>>,
    notify: Notify,
}

/// Owns the pending-alert buffer and cooldown map — process-scoped global
/// mutable state per spec.md §9, encapsulated here with init-on-construction.
pub struct NotificationDispatcher {
    inner: Arc<Inner>,
    timer_handles: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl NotificationDispatcher {
    pub fn new(cooldown_minutes: u64, grouping: GroupingConfig, sinks: Vec<Arc<dyn NotificationSink>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                cooldown_secs: (cooldown_minutes * 60) as i64,
                grouping,
                cooldowns: Mutex::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                sinks,
                notify: Notify::new(),
            }),
            timer_handles: Mutex::new(HashMap::new()),
        }
    }

    /// Queues an alert for grouped dispatch, respecting cooldown. Starts
    /// the group's grouping-window timer if this is the group's first
    /// queued alert.
    pub fn queue_alert(&self, alert: Alert, now_unix: i64) {
        {
            let cooldowns = self.inner.cooldowns.lock();
            if let Some((last_sent, start_time_at_send)) = cooldowns.get(&alert.id) {
                if alert.start_time == *start_time_at_send
                    && now_unix - last_sent < self.inner.cooldown_secs
                {
                    return;
                }
            }
        }

        let key = grouping_key(&alert, &self.inner.grouping);
        let mut pending = self.inner.pending.lock();
        let is_new_group = !pending.contains_key(&key);
        let group = pending.entry(key.clone()).or_insert_with(|| PendingGroup {
            alerts: HashMap::new(),
            first_queued_at: now_unix,
        });
        group.alerts.insert(alert.id.clone(), alert);
        drop(pending);

        if is_new_group {
            self.start_group_timer(key);
        }
    }

    /// spec.md §4.8 "Cancellation": resolving an alert removes it from the
    /// pending buffer; if the buffer empties, stop the timer.
    pub fn cancel_alert(&self, alert_id: &str) {
        let mut pending = self.inner.pending.lock();
        let mut emptied_keys = Vec::new();
        for (key, group) in pending.iter_mut() {
            if group.alerts.remove(alert_id).is_some() && group.alerts.is_empty() {
                emptied_keys.push(key.clone());
            }
        }
        for key in &emptied_keys {
            pending.remove(key);
        }
        drop(pending);
        let mut handles = self.timer_handles.lock();
        for key in emptied_keys {
            if let Some(handle) = handles.remove(&key) {
                handle.abort();
            }
        }
    }

    fn start_group_timer(&self, key: String) {
        let inner = self.inner.clone();
        let window = Duration::from_secs(self.inner.grouping.window_secs);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            Inner::flush_group(&inner, &key).await;
        });
        self.timer_handles.lock().insert(key, handle);
    }

    pub fn sink_count(&self) -> usize {
        self.inner.sinks.len()
    }
}

impl Inner {
    async fn flush_group(inner: &Arc<Inner>, key: &str) {
        let group = {
            let mut pending = inner.pending.lock();
            pending.remove(key)
        };
        let Some(group) = group else { return };
        if group.alerts.is_empty() {
            return;
        }

        let alerts: Vec<Alert> = group.alerts.into_values().collect();
        let now = group.first_queued_at;
        {
            let mut cooldowns = inner.cooldowns.lock();
            for alert in &alerts {
                cooldowns.insert(alert.id.clone(), (now, alert.start_time));
            }
        }

        let title = format!("{} alert(s)", alerts.len());
        let body = alerts
            .iter()
            .map(|a| format!("{}: {} ({})", a.resource_name, a.message, a.value))
            .collect::<Vec<_>>()
            .join("\n");
        let payload = NotificationPayload { body, title, kind: NotificationKind::Warning, alerts };

        // spec.md §4.8 "Sink failures are logged but never block other
        // sinks; one slow sink must not stall the scheduler" — dispatch
        // concurrently and swallow individual errors.
        let sends = inner.sinks.iter().map(|sink| {
            let sink = sink.clone();
            let payload = payload.clone();
            async move {
                if let Err(err) = sink.send(&payload).await {
                    tracing::warn!(sink = sink.name(), error = %err, "notification sink failed");
                }
            }
        });
        futures::future::join_all(sends).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink {
        sends: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl NotificationSink for CountingSink {
        async fn send(&self, _payload: &NotificationPayload) -> anyhow::Result<()> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn name(&self) -> &str {
            "counting"
        }
    }

    fn alert(id: &str, start_time: i64) -> Alert {
        Alert {
            id: id.to_string(),
            alert_type: "cpu".to_string(),
            level: crate::state::models::AlertLevel::Warning,
            resource_id: id.to_string(),
            resource_name: id.to_string(),
            node: Some("node1".to_string()),
            instance: "pve1".to_string(),
            message: "cpu high".to_string(),
            value: 95.0,
            threshold: 90.0,
            start_time,
            last_seen: start_time,
            acknowledged: false,
            ack_time: None,
            ack_user: None,
        }
    }

    #[tokio::test]
    async fn grouped_alerts_flush_as_one_send_per_sink() {
        let sends = Arc::new(AtomicUsize::new(0));
        let sink: Arc<dyn NotificationSink> = Arc::new(CountingSink { sends: sends.clone() });
        let dispatcher = NotificationDispatcher::new(
            15,
            GroupingConfig { window_secs: 0, by_node: true, by_guest: true },
            vec![sink],
        );
        dispatcher.queue_alert(alert("a-1", 0), 0);
        dispatcher.queue_alert(alert("a-2", 0), 0);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sends.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancelling_all_pending_alerts_prevents_send() {
        let sends = Arc::new(AtomicUsize::new(0));
        let sink: Arc<dyn NotificationSink> = Arc::new(CountingSink { sends: sends.clone() });
        let dispatcher = NotificationDispatcher::new(
            15,
            GroupingConfig { window_secs: 0, by_node: true, by_guest: true },
            vec![sink],
        );
        dispatcher.queue_alert(alert("a-1", 0), 0);
        dispatcher.cancel_alert("a-1");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sends.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn grouping_key_combines_node_and_guest() {
        let config = GroupingConfig { window_secs: 30, by_node: true, by_guest: true };
        let key = grouping_key(&alert("a-1", 0), &config);
        assert_eq!(key, "node1/a-1");
    }
}
