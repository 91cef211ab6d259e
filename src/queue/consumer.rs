use super::{Delivery, RecomputeTrigger, TriggerQueue};
use crate::feed::FeedEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    /// Maximum deliveries pulled per poll.
    pub batch_size: usize,
    /// Sleep between polls when the queue is empty.
    pub poll_interval: Duration,
    /// Wall-clock budget for one user's recompute; on expiry the
    /// deliveries stay unacked and the queue redelivers them.
    pub recompute_timeout: Duration,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            poll_interval: Duration::from_millis(500),
            recompute_timeout: Duration::from_secs(60),
        }
    }
}

/// What happened to one processed batch.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Users recomputed successfully, with their new feed counts.
    pub recomputed: Vec<(String, usize)>,
    /// Users whose recompute failed, with the error message.
    pub failed: Vec<(String, String)>,
    /// Malformed deliveries dropped (and acked) with a warning.
    pub dropped: usize,
}

/// Groups deliveries by user id in first-seen order. Returns the groups
/// and the ids of malformed deliveries.
fn group_by_user(deliveries: &[Delivery]) -> (Vec<(String, Vec<u64>)>, Vec<u64>) {
    let mut groups: Vec<(String, Vec<u64>)> = Vec::new();
    let mut invalid = Vec::new();
    for delivery in deliveries {
        match RecomputeTrigger::parse(&delivery.body) {
            Ok(trigger) => {
                match groups.iter_mut().find(|(user, _)| *user == trigger.user_id) {
                    Some((_, ids)) => ids.push(delivery.id),
                    None => groups.push((trigger.user_id, vec![delivery.id])),
                }
            }
            Err(err) => {
                warn!("Dropping invalid trigger delivery {}: {}", delivery.id, err);
                invalid.push(delivery.id);
            }
        }
    }
    (groups, invalid)
}

/// Processes one batch of deliveries: coalesces triggers per user and
/// invokes the engine once per distinct user, however many triggers that
/// user produced. A failed user leaves their deliveries unacked (the
/// queue's redelivery is the retry backstop) and never prevents other
/// users in the batch from completing.
pub async fn recompute_batch(
    engine: &Arc<FeedEngine>,
    queue: &dyn TriggerQueue,
    deliveries: Vec<Delivery>,
    recompute_timeout: Duration,
) -> BatchOutcome {
    let mut outcome = BatchOutcome::default();
    let (groups, invalid) = group_by_user(&deliveries);
    if !invalid.is_empty() {
        outcome.dropped = invalid.len();
        // Malformed payloads can never succeed; ack so they are not
        // redelivered forever.
        queue.ack(&invalid).await;
    }

    for (user_id, delivery_ids) in groups {
        let engine = Arc::clone(engine);
        let user = user_id.clone();
        let result = tokio::time::timeout(
            recompute_timeout,
            tokio::task::spawn_blocking(move || engine.recompute(&user)),
        )
        .await;

        match result {
            Ok(Ok(Ok(feed_count))) => {
                debug!(
                    "Recomputed feed for user {} ({} trigger(s) coalesced): {} entries",
                    user_id,
                    delivery_ids.len(),
                    feed_count
                );
                queue.ack(&delivery_ids).await;
                outcome.recomputed.push((user_id, feed_count));
            }
            Ok(Ok(Err(err))) => {
                error!("Feed recompute failed for user {}: {}", user_id, err);
                outcome.failed.push((user_id, err.to_string()));
            }
            Ok(Err(join_err)) => {
                error!("Feed recompute panicked for user {}: {}", user_id, join_err);
                outcome.failed.push((user_id, join_err.to_string()));
            }
            Err(_) => {
                error!(
                    "Feed recompute timed out for user {} after {:?}",
                    user_id, recompute_timeout
                );
                outcome.failed.push((user_id, "timed out".to_string()));
            }
        }
    }
    outcome
}

/// Long-running consumer loop: poll, process, sleep, until cancelled.
pub async fn run_consumer(
    engine: Arc<FeedEngine>,
    queue: Arc<dyn TriggerQueue>,
    settings: ConsumerSettings,
    shutdown: CancellationToken,
) {
    info!(
        "Trigger consumer started (batch size {}, poll every {:?})",
        settings.batch_size, settings.poll_interval
    );
    loop {
        if shutdown.is_cancelled() {
            break;
        }
        let deliveries = queue.receive_batch(settings.batch_size).await;
        if deliveries.is_empty() {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(settings.poll_interval) => {}
            }
            continue;
        }
        let outcome =
            recompute_batch(&engine, queue.as_ref(), deliveries, settings.recompute_timeout).await;
        if !outcome.failed.is_empty() {
            warn!(
                "Batch finished with {} failed user(s) out of {}",
                outcome.failed.len(),
                outcome.failed.len() + outcome.recomputed.len()
            );
        }
    }
    info!("Trigger consumer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{MemoryTriggerQueue, TriggerReason};
    use crate::store::{MemoryFeedDataStore, Song, SongStore, Subscription, SubscriptionStore, SubscriptionType};

    fn song(id: &str, genre: &str) -> Song {
        Song {
            music_id: id.to_string(),
            title: id.to_string(),
            artist_ids: vec![],
            genres: vec![genre.to_string()],
            album_id: None,
            file_key: None,
            cover_key: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn subscribe(store: &MemoryFeedDataStore, user: &str, genre: &str) {
        store
            .put_subscription(&Subscription {
                user_id: user.to_string(),
                subscription_type: SubscriptionType::Genre,
                target_id: genre.to_string(),
                created_at: 0,
            })
            .unwrap();
    }

    #[tokio::test]
    async fn triggers_for_one_user_coalesce_into_one_recompute() {
        let store = Arc::new(MemoryFeedDataStore::new());
        store.put_song(&song("m1", "rock")).unwrap();
        subscribe(&store, "u1", "rock");
        let engine = Arc::new(FeedEngine::new(store.clone()));
        let queue = MemoryTriggerQueue::new();

        for reason in [TriggerReason::Subscribe, TriggerReason::Rate, TriggerReason::Rate] {
            queue
                .enqueue(&RecomputeTrigger::new("u1", reason, None))
                .await
                .unwrap();
        }
        let deliveries = queue.receive_batch(10).await;
        assert_eq!(deliveries.len(), 3);

        let outcome =
            recompute_batch(&engine, &queue, deliveries, Duration::from_secs(5)).await;
        assert_eq!(outcome.recomputed, vec![("u1".to_string(), 1)]);
        // One engine run, not three
        assert_eq!(store.replace_feed_calls(), 1);
        // All three deliveries acked
        assert_eq!(queue.pending_len(), 0);
        assert!(queue.receive_batch(10).await.is_empty());
    }

    #[tokio::test]
    async fn each_distinct_user_is_recomputed_once() {
        let store = Arc::new(MemoryFeedDataStore::new());
        store.put_song(&song("m1", "rock")).unwrap();
        subscribe(&store, "u1", "rock");
        subscribe(&store, "u2", "rock");
        let engine = Arc::new(FeedEngine::new(store.clone()));
        let queue = MemoryTriggerQueue::new();

        for user in ["u1", "u2", "u1"] {
            queue
                .enqueue(&RecomputeTrigger::new(user, TriggerReason::Rate, None))
                .await
                .unwrap();
        }
        let deliveries = queue.receive_batch(10).await;
        let outcome =
            recompute_batch(&engine, &queue, deliveries, Duration::from_secs(5)).await;

        assert_eq!(outcome.recomputed.len(), 2);
        assert_eq!(store.replace_feed_calls(), 2);
    }

    #[tokio::test]
    async fn malformed_deliveries_are_dropped_not_fatal() {
        let store = Arc::new(MemoryFeedDataStore::new());
        store.put_song(&song("m1", "rock")).unwrap();
        subscribe(&store, "u1", "rock");
        let engine = Arc::new(FeedEngine::new(store.clone()));
        let queue = MemoryTriggerQueue::with_visibility_timeout(Duration::from_millis(0));

        queue
            .enqueue(&RecomputeTrigger::new("u1", TriggerReason::Rate, None))
            .await
            .unwrap();
        let mut deliveries = queue.receive_batch(10).await;
        deliveries.push(Delivery {
            id: 9999,
            body: "not json".to_string(),
            receive_count: 1,
        });

        let outcome =
            recompute_batch(&engine, &queue, deliveries, Duration::from_secs(5)).await;
        assert_eq!(outcome.dropped, 1);
        assert_eq!(outcome.recomputed.len(), 1);
        assert!(outcome.failed.is_empty());
    }

    #[tokio::test]
    async fn consumer_loop_processes_and_stops_on_cancel() {
        let store = Arc::new(MemoryFeedDataStore::new());
        store.put_song(&song("m1", "rock")).unwrap();
        subscribe(&store, "u1", "rock");
        let engine = Arc::new(FeedEngine::new(store.clone()));
        let queue = Arc::new(MemoryTriggerQueue::new());

        queue
            .enqueue(&RecomputeTrigger::new("u1", TriggerReason::Subscribe, None))
            .await
            .unwrap();

        let shutdown = CancellationToken::new();
        let settings = ConsumerSettings {
            batch_size: 10,
            poll_interval: Duration::from_millis(10),
            recompute_timeout: Duration::from_secs(5),
        };
        let handle = tokio::spawn(run_consumer(
            engine,
            queue.clone() as Arc<dyn TriggerQueue>,
            settings,
            shutdown.clone(),
        ));

        // Wait for the queue to drain
        for _ in 0..100 {
            if store.replace_feed_calls() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(store.replace_feed_calls(), 1);

        shutdown.cancel();
        handle.await.unwrap();
    }
}
