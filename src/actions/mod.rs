//! Producer-side operations: the fact mutations (subscribe, rate, play,
//! song CRUD) that enqueue recompute triggers for every affected user.

use crate::queue::{RecomputeTrigger, TriggerQueue, TriggerReason};
use crate::store::{
    FeedDataStore, HistoryStore, PlayHistoryEntry, Reaction, ReactionStore, Song, SongStore,
    Subscription, SubscriptionStore, SubscriptionType,
};
use anyhow::Result;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

pub struct Actions {
    store: Arc<dyn FeedDataStore>,
    queue: Arc<dyn TriggerQueue>,
}

impl Actions {
    pub fn new(store: Arc<dyn FeedDataStore>, queue: Arc<dyn TriggerQueue>) -> Self {
        Self { store, queue }
    }

    async fn trigger(
        &self,
        user_id: &str,
        reason: TriggerReason,
        music_id: Option<&str>,
    ) -> Result<()> {
        self.queue
            .enqueue(&RecomputeTrigger::new(user_id, reason, music_id))
            .await
    }

    pub async fn subscribe(
        &self,
        user_id: &str,
        subscription_type: SubscriptionType,
        target_id: &str,
    ) -> Result<()> {
        self.store.put_subscription(&Subscription {
            user_id: user_id.to_string(),
            subscription_type,
            target_id: target_id.to_string(),
            created_at: chrono::Utc::now().timestamp(),
        })?;
        self.trigger(user_id, TriggerReason::Subscribe, None).await
    }

    pub async fn unsubscribe(
        &self,
        user_id: &str,
        subscription_type: SubscriptionType,
        target_id: &str,
    ) -> Result<()> {
        self.store
            .delete_subscription(user_id, subscription_type, target_id)?;
        self.trigger(user_id, TriggerReason::Unsubscribe, None).await
    }

    pub async fn rate(&self, user_id: &str, music_id: &str, reaction: Reaction) -> Result<()> {
        self.store.put_reaction(user_id, music_id, reaction)?;
        self.trigger(user_id, TriggerReason::Rate, Some(music_id))
            .await
    }

    pub async fn unrate(&self, user_id: &str, music_id: &str) -> Result<()> {
        self.store.delete_reaction(user_id, music_id)?;
        self.trigger(user_id, TriggerReason::Rate, Some(music_id))
            .await
    }

    /// Records a play and returns the trimmed recent-plays list.
    pub async fn record_play(&self, user_id: &str, genre: &str) -> Result<Vec<PlayHistoryEntry>> {
        self.store.record_play(
            user_id,
            PlayHistoryEntry {
                genre: genre.to_string(),
                played_at: chrono::Utc::now().timestamp(),
            },
        )?;
        self.trigger(user_id, TriggerReason::Play, None).await?;
        self.store.recent_plays(user_id)
    }

    /// Users whose feed could change when this song appears or
    /// disappears: everyone subscribed to one of its artists or genres.
    fn affected_users(&self, song: &Song) -> Result<BTreeSet<String>> {
        let mut users = BTreeSet::new();
        for artist_id in &song.artist_ids {
            users.extend(
                self.store
                    .subscribers_of(SubscriptionType::Artist, artist_id)?,
            );
        }
        for genre in &song.genres {
            users.extend(self.store.subscribers_of(SubscriptionType::Genre, genre)?);
        }
        Ok(users)
    }

    pub async fn add_song(&self, song: &Song) -> Result<()> {
        self.store.put_song(song)?;
        let users = self.affected_users(song)?;
        debug!(
            "Song {} added, triggering recompute for {} subscriber(s)",
            song.music_id,
            users.len()
        );
        for user_id in users {
            self.trigger(&user_id, TriggerReason::SongAdded, Some(&song.music_id))
                .await?;
        }
        Ok(())
    }

    pub async fn remove_song(&self, music_id: &str) -> Result<()> {
        // Fetch first: the fan-out needs the song's artists and genres.
        let Some(song) = self.store.get_song(music_id)? else {
            return Ok(());
        };
        self.store.delete_song(music_id)?;
        let users = self.affected_users(&song)?;
        for user_id in users {
            self.trigger(&user_id, TriggerReason::SongRemoved, Some(music_id))
                .await?;
        }
        Ok(())
    }
}
