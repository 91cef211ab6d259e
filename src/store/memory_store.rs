use super::models::{
    FeedEntry, PlayHistoryEntry, Reaction, Song, Subscription, SubscriptionType, MAX_RECENT_PLAYS,
};
use super::trait_def::{
    BatchGetResult, FeedDataStore, FeedStore, HistoryStore, ReactionStore, SongStore,
    SubscriptionStore,
};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Default)]
struct Inner {
    songs: HashMap<String, Song>,
    subscriptions: Vec<Subscription>,
    reactions: HashMap<(String, String), Reaction>,
    history: HashMap<String, Vec<PlayHistoryEntry>>,
    feeds: HashMap<String, Vec<FeedEntry>>,
}

/// In-memory implementation of the full store surface.
///
/// Used by tests and demos in place of sqlite. Two probes exist purely
/// for tests: `set_batch_failures` makes the next N bulk reads report all
/// keys as unprocessed (exercising the bounded retry loop), and
/// `replace_feed_calls` counts engine write-backs (one per recompute).
#[derive(Default)]
pub struct MemoryFeedDataStore {
    inner: Mutex<Inner>,
    batch_failures: AtomicUsize,
    replace_feed_calls: AtomicUsize,
}

impl MemoryFeedDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` calls to `get_songs_batch` return every requested
    /// key as unprocessed.
    pub fn set_batch_failures(&self, count: usize) {
        self.batch_failures.store(count, Ordering::SeqCst);
    }

    /// Number of times `replace_feed` has been called.
    pub fn replace_feed_calls(&self) -> usize {
        self.replace_feed_calls.load(Ordering::SeqCst)
    }
}

impl SongStore for MemoryFeedDataStore {
    fn get_song(&self, music_id: &str) -> Result<Option<Song>> {
        Ok(self.inner.lock().unwrap().songs.get(music_id).cloned())
    }

    fn put_song(&self, song: &Song) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .songs
            .insert(song.music_id.clone(), song.clone());
        Ok(())
    }

    fn delete_song(&self, music_id: &str) -> Result<()> {
        self.inner.lock().unwrap().songs.remove(music_id);
        Ok(())
    }

    fn song_ids_by_genre(&self, genre: &str, limit: usize) -> Result<Vec<String>> {
        let inner = self.inner.lock().unwrap();
        let mut ids: Vec<String> = inner
            .songs
            .values()
            .filter(|song| song.genres.iter().any(|g| g == genre))
            .map(|song| song.music_id.clone())
            .collect();
        ids.sort();
        ids.truncate(limit);
        Ok(ids)
    }

    fn song_ids_by_artist(&self, artist_id: &str) -> Result<Vec<String>> {
        let inner = self.inner.lock().unwrap();
        let mut ids: Vec<String> = inner
            .songs
            .values()
            .filter(|song| song.artist_ids.iter().any(|a| a == artist_id))
            .map(|song| song.music_id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn get_songs_batch(&self, music_ids: &[String]) -> Result<BatchGetResult> {
        let remaining = self.batch_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.batch_failures.store(remaining - 1, Ordering::SeqCst);
            return Ok(BatchGetResult {
                found: HashMap::new(),
                unprocessed: music_ids.to_vec(),
            });
        }
        let inner = self.inner.lock().unwrap();
        let found = music_ids
            .iter()
            .filter_map(|id| inner.songs.get(id).map(|song| (id.clone(), song.clone())))
            .collect();
        Ok(BatchGetResult {
            found,
            unprocessed: Vec::new(),
        })
    }
}

impl SubscriptionStore for MemoryFeedDataStore {
    fn put_subscription(&self, subscription: &Subscription) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.subscriptions.retain(|s| {
            !(s.user_id == subscription.user_id
                && s.subscription_type == subscription.subscription_type
                && s.target_id == subscription.target_id)
        });
        inner.subscriptions.push(subscription.clone());
        Ok(())
    }

    fn delete_subscription(
        &self,
        user_id: &str,
        subscription_type: SubscriptionType,
        target_id: &str,
    ) -> Result<()> {
        self.inner.lock().unwrap().subscriptions.retain(|s| {
            !(s.user_id == user_id
                && s.subscription_type == subscription_type
                && s.target_id == target_id)
        });
        Ok(())
    }

    fn subscriptions_for_user(&self, user_id: &str) -> Result<Vec<Subscription>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .subscriptions
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect())
    }

    fn subscribers_of(
        &self,
        subscription_type: SubscriptionType,
        target_id: &str,
    ) -> Result<Vec<String>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .subscriptions
            .iter()
            .filter(|s| s.subscription_type == subscription_type && s.target_id == target_id)
            .map(|s| s.user_id.clone())
            .collect())
    }
}

impl ReactionStore for MemoryFeedDataStore {
    fn put_reaction(&self, user_id: &str, music_id: &str, reaction: Reaction) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .reactions
            .insert((user_id.to_string(), music_id.to_string()), reaction);
        Ok(())
    }

    fn delete_reaction(&self, user_id: &str, music_id: &str) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .reactions
            .remove(&(user_id.to_string(), music_id.to_string()));
        Ok(())
    }

    fn reactions_for_user(&self, user_id: &str) -> Result<HashMap<String, Reaction>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .reactions
            .iter()
            .filter(|((uid, _), _)| uid == user_id)
            .map(|((_, mid), reaction)| (mid.clone(), *reaction))
            .collect())
    }
}

impl HistoryStore for MemoryFeedDataStore {
    fn recent_plays(&self, user_id: &str) -> Result<Vec<PlayHistoryEntry>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .history
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    fn record_play(&self, user_id: &str, entry: PlayHistoryEntry) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let plays = inner.history.entry(user_id.to_string()).or_default();
        plays.push(entry);
        if plays.len() > MAX_RECENT_PLAYS {
            let excess = plays.len() - MAX_RECENT_PLAYS;
            plays.drain(..excess);
        }
        Ok(())
    }
}

impl FeedStore for MemoryFeedDataStore {
    fn feed_for_user(&self, user_id: &str) -> Result<Vec<FeedEntry>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .feeds
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    fn replace_feed(&self, user_id: &str, entries: &[FeedEntry]) -> Result<()> {
        self.replace_feed_calls.fetch_add(1, Ordering::SeqCst);
        self.inner
            .lock()
            .unwrap()
            .feeds
            .insert(user_id.to_string(), entries.to_vec());
        Ok(())
    }
}

impl FeedDataStore for MemoryFeedDataStore {}
