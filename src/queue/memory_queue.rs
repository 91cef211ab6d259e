use super::{Delivery, RecomputeTrigger, TriggerQueue, MAX_RECEIVE_COUNT};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::warn;

const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(90);

struct StoredMessage {
    id: u64,
    body: String,
    receive_count: u32,
}

#[derive(Default)]
struct QueueInner {
    pending: VecDeque<StoredMessage>,
    // In-flight messages and the instant they become visible again.
    inflight: HashMap<u64, (StoredMessage, Instant)>,
    dead: Vec<StoredMessage>,
    next_id: u64,
}

/// In-process trigger queue with at-least-once semantics: unacked
/// messages reappear after the visibility timeout, and a message
/// received more than `MAX_RECEIVE_COUNT` times moves to an internal
/// dead-letter list instead of being delivered again.
pub struct MemoryTriggerQueue {
    inner: Mutex<QueueInner>,
    visibility_timeout: Duration,
}

impl Default for MemoryTriggerQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTriggerQueue {
    pub fn new() -> Self {
        Self::with_visibility_timeout(DEFAULT_VISIBILITY_TIMEOUT)
    }

    pub fn with_visibility_timeout(visibility_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            visibility_timeout,
        }
    }

    /// Messages waiting to be received (excludes in-flight ones).
    pub fn pending_len(&self) -> usize {
        self.inner.lock().unwrap().pending.len()
    }

    /// Bodies of dead-lettered messages, oldest first.
    pub fn dead_letters(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .dead
            .iter()
            .map(|m| m.body.clone())
            .collect()
    }

    fn requeue_expired(inner: &mut QueueInner, now: Instant) {
        let expired: Vec<u64> = inner
            .inflight
            .iter()
            .filter(|(_, (_, visible_at))| *visible_at <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some((message, _)) = inner.inflight.remove(&id) {
                inner.pending.push_back(message);
            }
        }
    }
}

#[async_trait]
impl TriggerQueue for MemoryTriggerQueue {
    async fn enqueue(&self, trigger: &RecomputeTrigger) -> Result<()> {
        let body = serde_json::to_string(trigger)?;
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.pending.push_back(StoredMessage {
            id,
            body,
            receive_count: 0,
        });
        Ok(())
    }

    async fn receive_batch(&self, max: usize) -> Vec<Delivery> {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        Self::requeue_expired(&mut inner, now);

        let mut batch = Vec::new();
        while batch.len() < max {
            let Some(mut message) = inner.pending.pop_front() else {
                break;
            };
            message.receive_count += 1;
            if message.receive_count > MAX_RECEIVE_COUNT {
                warn!(
                    "Dead-lettering trigger after {} receives: {}",
                    message.receive_count - 1,
                    message.body
                );
                inner.dead.push(message);
                continue;
            }
            batch.push(Delivery {
                id: message.id,
                body: message.body.clone(),
                receive_count: message.receive_count,
            });
            let visible_at = now + self.visibility_timeout;
            inner.inflight.insert(message.id, (message, visible_at));
        }
        batch
    }

    async fn ack(&self, delivery_ids: &[u64]) {
        let mut inner = self.inner.lock().unwrap();
        for id in delivery_ids {
            inner.inflight.remove(id);
        }
    }
}
