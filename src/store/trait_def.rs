use super::models::{FeedEntry, PlayHistoryEntry, Reaction, Song, Subscription, SubscriptionType};
use anyhow::Result;
use std::collections::HashMap;

/// Result of a bulk song lookup. Backends with throttled bulk reads may
/// return a subset and list the keys they could not process this round;
/// callers resubmit `unprocessed` (see `fetch_songs_with_retry`).
#[derive(Debug, Default)]
pub struct BatchGetResult {
    pub found: HashMap<String, Song>,
    pub unprocessed: Vec<String>,
}

pub trait SongStore: Send + Sync {
    /// Returns the song with the given id, or None if it does not exist.
    fn get_song(&self, music_id: &str) -> Result<Option<Song>>;

    /// Inserts or fully replaces a song and its index rows.
    fn put_song(&self, song: &Song) -> Result<()>;

    /// Deletes a song and its index rows. Deleting a missing song is not
    /// an error.
    fn delete_song(&self, music_id: &str) -> Result<()>;

    /// Returns up to `limit` song ids indexed under the given genre.
    /// The limit is a pagination ceiling, not a business rule.
    fn song_ids_by_genre(&self, genre: &str, limit: usize) -> Result<Vec<String>>;

    /// Returns the known song ids of one artist.
    fn song_ids_by_artist(&self, artist_id: &str) -> Result<Vec<String>>;

    /// Bulk lookup by ids. Missing songs are simply absent from `found`;
    /// `unprocessed` carries keys the backend declined this round.
    fn get_songs_batch(&self, music_ids: &[String]) -> Result<BatchGetResult>;
}

pub trait SubscriptionStore: Send + Sync {
    /// Records a subscription. Re-subscribing is a no-op upsert.
    fn put_subscription(&self, subscription: &Subscription) -> Result<()>;

    /// Removes a subscription. Removing a missing one is not an error.
    fn delete_subscription(
        &self,
        user_id: &str,
        subscription_type: SubscriptionType,
        target_id: &str,
    ) -> Result<()>;

    /// Returns all subscriptions of one user.
    fn subscriptions_for_user(&self, user_id: &str) -> Result<Vec<Subscription>>;

    /// Returns the ids of all users subscribed to the given target
    /// (secondary index by type + target).
    fn subscribers_of(
        &self,
        subscription_type: SubscriptionType,
        target_id: &str,
    ) -> Result<Vec<String>>;
}

pub trait ReactionStore: Send + Sync {
    /// Upserts the user's reaction to a song; latest write wins.
    fn put_reaction(&self, user_id: &str, music_id: &str, reaction: Reaction) -> Result<()>;

    /// Removes the user's reaction to a song, if any.
    fn delete_reaction(&self, user_id: &str, music_id: &str) -> Result<()>;

    /// Returns all of the user's reactions keyed by song id.
    fn reactions_for_user(&self, user_id: &str) -> Result<HashMap<String, Reaction>>;
}

pub trait HistoryStore: Send + Sync {
    /// Returns the user's recent plays, oldest first.
    fn recent_plays(&self, user_id: &str) -> Result<Vec<PlayHistoryEntry>>;

    /// Appends a play and trims the list to `MAX_RECENT_PLAYS`,
    /// evicting oldest entries first. Append happens before the trim, so
    /// a transiently over-length list is tolerated.
    fn record_play(&self, user_id: &str, entry: PlayHistoryEntry) -> Result<()>;
}

pub trait FeedStore: Send + Sync {
    /// Returns the user's stored feed, highest score first.
    fn feed_for_user(&self, user_id: &str) -> Result<Vec<FeedEntry>>;

    /// Atomically replaces the user's whole feed partition with the given
    /// entries. Passing an empty slice clears the feed.
    fn replace_feed(&self, user_id: &str, entries: &[FeedEntry]) -> Result<()>;
}

/// The full storage surface the feed pipeline runs against.
pub trait FeedDataStore:
    SongStore + SubscriptionStore + ReactionStore + HistoryStore + FeedStore
{
}
