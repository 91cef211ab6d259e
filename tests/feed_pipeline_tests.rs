//! End-to-end tests for the feed recomputation pipeline: producer
//! actions enqueue triggers, the batch consumer coalesces them, the
//! engine regenerates feeds.

use std::sync::Arc;
use std::time::Duration;

use tunefeed::actions::Actions;
use tunefeed::feed::{FeedEngine, DISLIKE_PENALTY, FEED_SIZE, LOVE_BONUS};
use tunefeed::queue::{
    recompute_batch, MemoryTriggerQueue, RecomputeTrigger, TriggerQueue, TriggerReason,
};
use tunefeed::store::{
    FeedDataStore, FeedStore, MemoryFeedDataStore, Reaction, ReactionStore, Song, SongStore,
    SqliteFeedDataStore, Subscription, SubscriptionStore, SubscriptionType,
};

fn song(id: &str, genres: &[&str], artists: &[&str]) -> Song {
    Song {
        music_id: id.to_string(),
        title: format!("title-{}", id),
        artist_ids: artists.iter().map(|s| s.to_string()).collect(),
        genres: genres.iter().map(|s| s.to_string()).collect(),
        album_id: None,
        file_key: None,
        cover_key: None,
        created_at: 0,
        updated_at: 0,
    }
}

fn subscribe(store: &dyn FeedDataStore, user: &str, t: SubscriptionType, target: &str) {
    store
        .put_subscription(&Subscription {
            user_id: user.to_string(),
            subscription_type: t,
            target_id: target.to_string(),
            created_at: 0,
        })
        .unwrap();
}

fn feed_ids(store: &dyn FeedDataStore, user: &str) -> Vec<String> {
    store
        .feed_for_user(user)
        .unwrap()
        .into_iter()
        .map(|e| e.music_id)
        .collect()
}

#[test]
fn recompute_is_idempotent_over_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteFeedDataStore::new(dir.path().join("feed.db")).unwrap());
    store.put_song(&song("m1", &["rock"], &["a1"])).unwrap();
    store.put_song(&song("m2", &["rock"], &[])).unwrap();
    subscribe(store.as_ref(), "u1", SubscriptionType::Genre, "rock");
    subscribe(store.as_ref(), "u1", SubscriptionType::Artist, "a1");
    let engine = FeedEngine::new(store.clone());

    let first_count = engine.recompute("u1").unwrap();
    let first = store.feed_for_user("u1").unwrap();
    let second_count = engine.recompute("u1").unwrap();
    let second = store.feed_for_user("u1").unwrap();

    assert_eq!(first_count, second_count);
    let key = |feed: &[tunefeed::store::FeedEntry]| -> Vec<(String, f64)> {
        feed.iter().map(|e| (e.music_id.clone(), e.score)).collect()
    };
    assert_eq!(key(&first), key(&second));
}

#[test]
fn stored_feed_is_bounded_by_top_k() {
    let store = Arc::new(MemoryFeedDataStore::new());
    for i in 0..(FEED_SIZE * 2) {
        store
            .put_song(&song(&format!("m{:03}", i), &["rock"], &[]))
            .unwrap();
    }
    subscribe(store.as_ref(), "u1", SubscriptionType::Genre, "rock");
    let engine = FeedEngine::new(store.clone());

    assert_eq!(engine.recompute("u1").unwrap(), FEED_SIZE);
    assert_eq!(store.feed_for_user("u1").unwrap().len(), FEED_SIZE);

    // Fewer candidates than K: the bound is min(K, candidates)
    let small = Arc::new(MemoryFeedDataStore::new());
    small.put_song(&song("only", &["rock"], &[])).unwrap();
    subscribe(small.as_ref(), "u1", SubscriptionType::Genre, "rock");
    let engine = FeedEngine::new(small.clone());
    assert_eq!(engine.recompute("u1").unwrap(), 1);
}

#[test]
fn no_stale_entries_survive_a_recompute() {
    let store = Arc::new(MemoryFeedDataStore::new());
    store.put_song(&song("old1", &["rock"], &[])).unwrap();
    store.put_song(&song("old2", &["rock"], &[])).unwrap();
    subscribe(store.as_ref(), "u1", SubscriptionType::Genre, "rock");
    let engine = FeedEngine::new(store.clone());
    engine.recompute("u1").unwrap();

    // Swap the catalog out from under the user
    store.delete_song("old1").unwrap();
    store.delete_song("old2").unwrap();
    store.put_song(&song("fresh", &["rock"], &[])).unwrap();
    engine.recompute("u1").unwrap();

    assert_eq!(feed_ids(store.as_ref(), "u1"), ["fresh"]);
}

#[test]
fn dislike_lowers_score_by_exactly_the_penalty() {
    let store = Arc::new(MemoryFeedDataStore::new());
    // Two identical songs, one of them disliked; both become candidates
    // through the genre subscription.
    store.put_song(&song("plain", &["rock"], &["a1"])).unwrap();
    store.put_song(&song("hated", &["rock"], &["a1"])).unwrap();
    subscribe(store.as_ref(), "u1", SubscriptionType::Genre, "rock");
    store.put_reaction("u1", "hated", Reaction::Dislike).unwrap();
    let engine = FeedEngine::new(store.clone());
    engine.recompute("u1").unwrap();

    let feed = store.feed_for_user("u1").unwrap();
    let score_of = |id: &str| feed.iter().find(|e| e.music_id == id).unwrap().score;
    assert_eq!(score_of("hated"), score_of("plain") + DISLIKE_PENALTY);
    assert!(score_of("hated") < 0.0);
}

// A reacted song is a candidate even when it matches neither the genre
// nor the artist subscriptions.
#[test]
fn reacted_song_outside_subscriptions_reaches_the_feed() {
    let store = Arc::new(MemoryFeedDataStore::new());
    store.put_song(&song("r1", &["rock"], &["A"])).unwrap();
    store.put_song(&song("X", &["jazz"], &["B"])).unwrap();
    subscribe(store.as_ref(), "u1", SubscriptionType::Genre, "rock");
    subscribe(store.as_ref(), "u1", SubscriptionType::Artist, "A");
    store.put_reaction("u1", "X", Reaction::Like).unwrap();
    let engine = FeedEngine::new(store.clone());
    engine.recompute("u1").unwrap();

    let ids = feed_ids(store.as_ref(), "u1");
    assert!(ids.contains(&"X".to_string()));
    assert!(ids.contains(&"r1".to_string()));
}

#[test]
fn loved_song_outranks_identical_neutral_song() {
    let store = Arc::new(MemoryFeedDataStore::new());
    store.put_song(&song("s1", &["rock"], &[])).unwrap();
    store.put_song(&song("s2", &["rock"], &[])).unwrap();
    store.put_song(&song("s3", &["jazz"], &[])).unwrap();
    subscribe(store.as_ref(), "u1", SubscriptionType::Genre, "rock");
    store.put_reaction("u1", "s2", Reaction::Love).unwrap();
    let engine = FeedEngine::new(store.clone());

    assert_eq!(engine.recompute("u1").unwrap(), 2);
    let feed = store.feed_for_user("u1").unwrap();
    let mut ids: Vec<&str> = feed.iter().map(|e| e.music_id.as_str()).collect();
    ids.sort();
    assert_eq!(ids, ["s1", "s2"]);

    let score_of = |id: &str| feed.iter().find(|e| e.music_id == id).unwrap().score;
    assert_eq!(score_of("s2"), score_of("s1") + LOVE_BONUS);
}

#[tokio::test]
async fn rapid_fire_triggers_coalesce_into_one_recompute() {
    let store = Arc::new(MemoryFeedDataStore::new());
    store.put_song(&song("m1", &["rock"], &[])).unwrap();
    subscribe(store.as_ref(), "u1", SubscriptionType::Genre, "rock");
    let engine = Arc::new(FeedEngine::new(store.clone()));
    let queue = MemoryTriggerQueue::new();

    for reason in [TriggerReason::Subscribe, TriggerReason::Rate, TriggerReason::Rate] {
        queue
            .enqueue(&RecomputeTrigger::new("u1", reason, Some("m1")))
            .await
            .unwrap();
    }
    let deliveries = queue.receive_batch(10).await;
    let outcome = recompute_batch(&engine, &queue, deliveries, Duration::from_secs(5)).await;

    assert_eq!(outcome.recomputed, vec![("u1".to_string(), 1)]);
    assert_eq!(store.replace_feed_calls(), 1);
}

#[test]
fn brand_new_user_gets_an_empty_feed() {
    let store = Arc::new(MemoryFeedDataStore::new());
    store.put_song(&song("m1", &["rock"], &[])).unwrap();
    let engine = FeedEngine::new(store.clone());

    assert_eq!(engine.recompute("nobody").unwrap(), 0);
    assert!(store.feed_for_user("nobody").unwrap().is_empty());
}

// Policy: an empty candidate set clears the previous feed, it does not
// preserve stale entries.
#[test]
fn unsubscribing_from_everything_empties_the_feed() {
    let store = Arc::new(MemoryFeedDataStore::new());
    store.put_song(&song("m1", &["rock"], &[])).unwrap();
    subscribe(store.as_ref(), "u1", SubscriptionType::Genre, "rock");
    let engine = FeedEngine::new(store.clone());
    assert_eq!(engine.recompute("u1").unwrap(), 1);

    store
        .delete_subscription("u1", SubscriptionType::Genre, "rock")
        .unwrap();
    assert_eq!(engine.recompute("u1").unwrap(), 0);
    assert!(store.feed_for_user("u1").unwrap().is_empty());
}

#[tokio::test]
async fn actions_drive_the_full_pipeline_over_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn FeedDataStore> =
        Arc::new(SqliteFeedDataStore::new(dir.path().join("feed.db")).unwrap());
    let queue = Arc::new(MemoryTriggerQueue::new());
    let actions = Actions::new(store.clone(), queue.clone());
    let engine = Arc::new(FeedEngine::new(store.clone()));

    store.put_song(&song("rock1", &["rock"], &["a1"])).unwrap();
    store.put_song(&song("rock2", &["rock"], &[])).unwrap();
    store.put_song(&song("jazz1", &["jazz"], &[])).unwrap();

    actions
        .subscribe("u1", SubscriptionType::Genre, "rock")
        .await
        .unwrap();
    actions.rate("u1", "rock2", Reaction::Love).await.unwrap();
    actions.record_play("u1", "rock").await.unwrap();

    let deliveries = queue.receive_batch(10).await;
    assert_eq!(deliveries.len(), 3);
    let outcome = recompute_batch(
        &engine,
        queue.as_ref(),
        deliveries,
        Duration::from_secs(10),
    )
    .await;
    assert_eq!(outcome.recomputed.len(), 1);
    assert!(outcome.failed.is_empty());

    let feed = store.feed_for_user("u1").unwrap();
    let ids: Vec<&str> = feed.iter().map(|e| e.music_id.as_str()).collect();
    // Loved song first, jazz song absent
    assert_eq!(ids, ["rock2", "rock1"]);
    assert!(feed[0].score > feed[1].score);
    // Explanations persisted with the entries
    assert_eq!(feed[0].reason.reaction, Some(Reaction::Love));
    assert_eq!(feed[1].reason.matched_genres, ["rock"]);

    // Everything acked; nothing left to redeliver
    assert_eq!(queue.pending_len(), 0);
}

#[tokio::test]
async fn new_song_triggers_subscribers_and_appears_in_their_feeds() {
    let store: Arc<dyn FeedDataStore> = Arc::new(MemoryFeedDataStore::new());
    let queue = Arc::new(MemoryTriggerQueue::new());
    let actions = Actions::new(store.clone(), queue.clone());
    let engine = Arc::new(FeedEngine::new(store.clone()));

    actions
        .subscribe("u1", SubscriptionType::Artist, "a1")
        .await
        .unwrap();
    // Drain the subscribe trigger
    let setup = queue.receive_batch(10).await;
    recompute_batch(&engine, queue.as_ref(), setup, Duration::from_secs(5)).await;

    actions
        .add_song(&song("new-hit", &["pop"], &["a1"]))
        .await
        .unwrap();
    let deliveries = queue.receive_batch(10).await;
    assert_eq!(deliveries.len(), 1);
    let outcome = recompute_batch(
        &engine,
        queue.as_ref(),
        deliveries,
        Duration::from_secs(5),
    )
    .await;
    assert_eq!(outcome.recomputed, vec![("u1".to_string(), 1)]);
    assert_eq!(feed_ids(store.as_ref(), "u1"), ["new-hit"]);
}
