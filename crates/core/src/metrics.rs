use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Process-wide counters for polls, alerts, and notifications, exposed via
/// the `/metrics` diagnostics route.
#[derive(Clone)]
pub struct CoreMetrics {
    inner: Arc<Inner>,
}

struct Inner {
    polls_total: AtomicU64,
    polls_failed: AtomicU64,
    ws_clients_active: AtomicU64,
    ws_messages_sent: AtomicU64,
    ws_bytes_sent: AtomicU64,
    alerts_raised: AtomicU64,
    alerts_resolved: AtomicU64,
    notifications_sent: AtomicU64,
    notifications_failed: AtomicU64,
    polls_by_upstream: RwLock<HashMap<String, u64>>,
}

impl CoreMetrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                polls_total: AtomicU64::new(0),
                polls_failed: AtomicU64::new(0),
                ws_clients_active: AtomicU64::new(0),
                ws_messages_sent: AtomicU64::new(0),
                ws_bytes_sent: AtomicU64::new(0),
                alerts_raised: AtomicU64::new(0),
                alerts_resolved: AtomicU64::new(0),
                notifications_sent: AtomicU64::new(0),
                notifications_failed: AtomicU64::new(0),
                polls_by_upstream: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn poll_completed(&self, upstream: &str, ok: bool) {
        self.inner.polls_total.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.inner.polls_failed.fetch_add(1, Ordering::Relaxed);
        }
        *self.inner.polls_by_upstream.write().entry(upstream.to_string()).or_insert(0) += 1;
    }

    pub fn ws_client_connected(&self) {
        self.inner.ws_clients_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ws_client_disconnected(&self) {
        let _ = self.inner.ws_clients_active.fetch_update(
            Ordering::Relaxed,
            Ordering::Relaxed,
            |c| if c > 0 { Some(c - 1) } else { None },
        );
    }

    pub fn ws_message_sent(&self, bytes: usize) {
        self.inner.ws_messages_sent.fetch_add(1, Ordering::Relaxed);
        self.inner.ws_bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn alert_raised(&self) {
        self.inner.alerts_raised.fetch_add(1, Ordering::Relaxed);
    }

    pub fn alert_resolved(&self) {
        self.inner.alerts_resolved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn notification_sent(&self, ok: bool) {
        if ok {
            self.inner.notifications_sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.inner.notifications_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            polls_total: self.inner.polls_total.load(Ordering::Relaxed),
            polls_failed: self.inner.polls_failed.load(Ordering::Relaxed),
            ws_clients_active: self.inner.ws_clients_active.load(Ordering::Relaxed),
            ws_messages_sent: self.inner.ws_messages_sent.load(Ordering::Relaxed),
            ws_bytes_sent: self.inner.ws_bytes_sent.load(Ordering::Relaxed),
            alerts_raised: self.inner.alerts_raised.load(Ordering::Relaxed),
            alerts_resolved: self.inner.alerts_resolved.load(Ordering::Relaxed),
            notifications_sent: self.inner.notifications_sent.load(Ordering::Relaxed),
            notifications_failed: self.inner.notifications_failed.load(Ordering::Relaxed),
            polls_by_upstream: self.inner.polls_by_upstream.read().clone(),
        }
    }
}

impl Default for CoreMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    pub polls_total: u64,
    pub polls_failed: u64,
    pub ws_clients_active: u64,
    pub ws_messages_sent: u64,
    pub ws_bytes_sent: u64,
    pub alerts_raised: u64,
    pub alerts_resolved: u64,
    pub notifications_sent: u64,
    pub notifications_failed: u64,
    pub polls_by_upstream: HashMap<String, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_counters_accumulate() {
        let m = CoreMetrics::new();
        m.poll_completed("pve1", true);
        m.poll_completed("pve1", false);
        let snap = m.snapshot();
        assert_eq!(snap.polls_total, 2);
        assert_eq!(snap.polls_failed, 1);
        assert_eq!(snap.polls_by_upstream.get("pve1"), Some(&2));
    }

    #[test]
    fn ws_client_count_never_underflows() {
        let m = CoreMetrics::new();
        m.ws_client_disconnected();
        m.ws_client_disconnected();
        assert_eq!(m.snapshot().ws_clients_active, 0);
    }
}
