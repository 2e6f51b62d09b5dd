//! Task Queue + DLQ (spec.md §4.1, C3).
//!
//! A bounded priority structure keyed by `(type,name)`, ordered by `nextRun`
//! ascending, ties broken lexicographically. The wait-for-readiness shape is
//! generalized from the teacher's `tokio::select!` ticker/shutdown loops
//! (`agent/registry.rs`) into a single `Notify`-driven wake on upsert.

use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;
use tokio::sync::Notify;

use crate::state::models::{InstanceKey, ScheduledTask};

#[derive(Debug, Clone)]
struct Entry {
    key: InstanceKey,
    next_run: i64,
    task: ScheduledTask,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.next_run == other.next_run && self.key == other.key
    }
}
impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    /// `BinaryHeap` is a max-heap; invert so the earliest `next_run` (and,
    /// on ties, the lexicographically smallest key) surfaces first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .next_run
            .cmp(&self.next_run)
            .then_with(|| other.key.cmp(&self.key))
    }
}

struct Inner {
    heap: BinaryHeap<Entry>,
}

/// Bounded priority queue with at-most-one-entry-per-key semantics.
pub struct TaskQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner { heap: BinaryHeap::new() }), notify: Notify::new() }
    }

    /// Replaces any existing entry for `task`'s key; else inserts. O(log n).
    pub fn upsert(&self, task: ScheduledTask) {
        let key = InstanceKey::new(task.instance_type.clone(), task.instance_name.clone());
        let mut inner = self.inner.lock();
        inner.heap.retain(|e| e.key != key);
        inner.heap.push(Entry { next_run: task.next_run, key, task });
        drop(inner);
        self.notify.notify_one();
    }

    pub fn remove(&self, key: &InstanceKey) {
        let mut inner = self.inner.lock();
        inner.heap.retain(|e| &e.key != key);
    }

    pub fn size(&self) -> usize {
        self.inner.lock().heap.len()
    }

    pub fn peek_all(&self, limit: usize) -> Vec<ScheduledTask> {
        let inner = self.inner.lock();
        let mut items: Vec<&Entry> = inner.heap.iter().collect();
        items.sort_by(|a, b| a.next_run.cmp(&b.next_run).then_with(|| a.key.cmp(&b.key)));
        items.into_iter().take(limit).map(|e| e.task.clone()).collect()
    }

    pub fn snapshot(&self) -> Vec<ScheduledTask> {
        self.peek_all(usize::MAX)
    }

    /// Blocks until the earliest `next_run` is due or `cancel` resolves,
    /// returning the head task. `now_unix` is supplied by the caller so the
    /// queue itself stays free of wall-clock reads.
    pub async fn wait_next(
        &self,
        now_unix: impl Fn() -> i64,
        cancel: &tokio::sync::watch::Receiver<bool>,
    ) -> Option<ScheduledTask> {
        let mut cancel = cancel.clone();
        loop {
            if *cancel.borrow() {
                return None;
            }
            let delay = {
                let mut inner = self.inner.lock();
                match inner.heap.peek() {
                    None => None,
                    Some(top) => {
                        let now = now_unix();
                        if top.next_run <= now {
                            let entry = inner.heap.pop().unwrap();
                            return Some(entry.task);
                        }
                        Some(Duration::from_secs((top.next_run - now).max(0) as u64))
                    }
                }
            };

            let notified = self.notify.notified();
            match delay {
                Some(d) => {
                    tokio::select! {
                        _ = tokio::time::sleep(d) => {}
                        _ = notified => {}
                        _ = cancel.changed() => {}
                    }
                }
                None => {
                    tokio::select! {
                        _ = notified => {}
                        _ = cancel.changed() => {}
                    }
                }
            }
        }
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Dead-letter entry carried by the DLQ instance of [`TaskQueue`]
/// (spec.md §4.1).
#[derive(Debug, Clone, serde::Serialize)]
pub struct DlqEntry {
    pub key: InstanceKey,
    pub reason: String,
    pub first_attempt: i64,
    pub last_attempt: i64,
    pub retry_count: u32,
    pub next_retry: i64,
}

/// Minimum DLQ retry interval (spec.md §4.1: "retried at a long fixed
/// interval (≥30 min)").
pub const DLQ_MIN_RETRY_SECS: i64 = 30 * 60;

pub struct DeadLetterQueue {
    entries: Mutex<std::collections::HashMap<InstanceKey, DlqEntry>>,
}

impl DeadLetterQueue {
    pub fn new() -> Self {
        Self { entries: Mutex::new(std::collections::HashMap::new()) }
    }

    pub fn route(&self, key: InstanceKey, reason: String, now_unix: i64) {
        let mut entries = self.entries.lock();
        entries
            .entry(key.clone())
            .and_modify(|e| {
                e.reason = reason.clone();
                e.last_attempt = now_unix;
                e.retry_count += 1;
                e.next_retry = now_unix + DLQ_MIN_RETRY_SECS;
            })
            .or_insert(DlqEntry {
                key,
                reason,
                first_attempt: now_unix,
                last_attempt: now_unix,
                retry_count: 0,
                next_retry: now_unix + DLQ_MIN_RETRY_SECS,
            });
    }

    pub fn remove(&self, key: &InstanceKey) {
        self.entries.lock().remove(key);
    }

    pub fn due(&self, now_unix: i64) -> Vec<DlqEntry> {
        self.entries.lock().values().filter(|e| e.next_retry <= now_unix).cloned().collect()
    }

    pub fn snapshot(&self) -> Vec<DlqEntry> {
        self.entries.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DeadLetterQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(kind: &str, name: &str, next_run: i64) -> ScheduledTask {
        ScheduledTask {
            instance_type: kind.to_string(),
            instance_name: name.to_string(),
            interval_secs: 10,
            next_run,
        }
    }

    #[test]
    fn upsert_replaces_same_key() {
        let q = TaskQueue::new();
        q.upsert(task("pve", "a", 100));
        q.upsert(task("pve", "a", 50));
        assert_eq!(q.size(), 1);
        assert_eq!(q.peek_all(1)[0].next_run, 50);
    }

    #[test]
    fn peek_all_orders_by_next_run_then_key() {
        let q = TaskQueue::new();
        q.upsert(task("pve", "b", 100));
        q.upsert(task("pve", "a", 100));
        q.upsert(task("pbs", "z", 50));
        let all = q.peek_all(10);
        assert_eq!(all[0].instance_name, "z");
        assert_eq!(all[1].instance_name, "a");
        assert_eq!(all[2].instance_name, "b");
    }

    #[test]
    fn remove_drops_entry() {
        let q = TaskQueue::new();
        q.upsert(task("pve", "a", 100));
        q.remove(&InstanceKey::new("pve", "a"));
        assert_eq!(q.size(), 0);
    }

    #[tokio::test]
    async fn wait_next_returns_due_task_immediately() {
        let q = TaskQueue::new();
        q.upsert(task("pve", "a", 0));
        let (_tx, rx) = tokio::sync::watch::channel(false);
        let got = q.wait_next(|| 10, &rx).await;
        assert_eq!(got.unwrap().instance_name, "a");
    }

    #[tokio::test]
    async fn wait_next_honors_cancellation() {
        let q = TaskQueue::new();
        let (tx, rx) = tokio::sync::watch::channel(false);
        tx.send(true).unwrap();
        let got = q.wait_next(|| 0, &rx).await;
        assert!(got.is_none());
    }

    #[test]
    fn dlq_route_sets_min_retry_interval() {
        let dlq = DeadLetterQueue::new();
        dlq.route(InstanceKey::new("pve", "a"), "timeout".to_string(), 1000);
        let entries = dlq.snapshot();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].next_retry, 1000 + DLQ_MIN_RETRY_SECS);
    }
}
