//! Recompute trigger queue: typed message payloads, the queue seam and
//! the batch consumer that coalesces triggers per user.

mod consumer;
mod memory_queue;

pub use consumer::{recompute_batch, run_consumer, BatchOutcome, ConsumerSettings};
pub use memory_queue::MemoryTriggerQueue;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A message is dead-lettered after this many failed receives.
pub const MAX_RECEIVE_COUNT: u32 = 5;

/// The fact change that caused a recompute request. The engine never
/// replays reasons, it always recomputes from current stored state; the
/// reason is carried for logging and dead-letter triage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
    Subscribe,
    Unsubscribe,
    Rate,
    Play,
    SongAdded,
    SongRemoved,
}

/// An asynchronous request to regenerate one user's feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecomputeTrigger {
    pub user_id: String,
    pub reason: TriggerReason,
    #[serde(default)]
    pub music_id: Option<String>,
    pub ts: i64,
}

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("malformed trigger payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("trigger payload has an empty userId")]
    MissingUserId,
}

impl RecomputeTrigger {
    pub fn new(user_id: &str, reason: TriggerReason, music_id: Option<&str>) -> Self {
        Self {
            user_id: user_id.to_string(),
            reason,
            music_id: music_id.map(str::to_string),
            ts: chrono::Utc::now().timestamp(),
        }
    }

    /// Parses and validates a raw delivery body. Required-field
    /// validation happens here, at the boundary, not deep in the engine.
    pub fn parse(raw: &str) -> Result<Self, TriggerError> {
        let trigger: RecomputeTrigger = serde_json::from_str(raw)?;
        if trigger.user_id.trim().is_empty() {
            return Err(TriggerError::MissingUserId);
        }
        Ok(trigger)
    }
}

/// One received message. The id is the receipt handle used for acking;
/// `receive_count` counts deliveries of the same message.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: u64,
    pub body: String,
    pub receive_count: u32,
}

/// At-least-once delivery queue of recompute triggers. Messages left
/// unacked become visible again after the visibility timeout; redelivery
/// and dead-lettering are the failure backstop, the application adds no
/// retry loop of its own.
#[async_trait]
pub trait TriggerQueue: Send + Sync {
    async fn enqueue(&self, trigger: &RecomputeTrigger) -> Result<()>;

    /// Receives up to `max` messages, marking them in-flight.
    async fn receive_batch(&self, max: usize) -> Vec<Delivery>;

    /// Acknowledges processed deliveries so they are never redelivered.
    async fn ack(&self, delivery_ids: &[u64]);
}
