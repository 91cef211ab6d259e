use crate::store::{
    FeedDataStore, HistoryStore, Reaction, ReactionStore, SubscriptionStore, SubscriptionType,
};
use anyhow::Result;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Everything the scorer needs to know about one user: who they follow,
/// what they reacted to, and how often they play each genre.
#[derive(Debug, Default)]
pub struct InterestProfile {
    pub subscribed_artists: HashSet<String>,
    pub subscribed_genres: HashSet<String>,
    pub reactions: HashMap<String, Reaction>,
    pub genre_plays: HashMap<String, u32>,
}

impl InterestProfile {
    pub fn load(store: &dyn FeedDataStore, user_id: &str) -> Result<Self> {
        let mut profile = InterestProfile::default();
        for subscription in store.subscriptions_for_user(user_id)? {
            match subscription.subscription_type {
                SubscriptionType::Artist => {
                    profile.subscribed_artists.insert(subscription.target_id);
                }
                SubscriptionType::Genre => {
                    profile.subscribed_genres.insert(subscription.target_id);
                }
            }
        }
        profile.reactions = store.reactions_for_user(user_id)?;
        for play in store.recent_plays(user_id)? {
            *profile.genre_plays.entry(play.genre).or_insert(0) += 1;
        }
        Ok(profile)
    }

    /// Genres the user is subscribed to or has recently played.
    /// Sorted so candidate gathering iterates deterministically.
    pub fn interest_genres(&self) -> BTreeSet<String> {
        self.subscribed_genres
            .iter()
            .chain(self.genre_plays.keys())
            .cloned()
            .collect()
    }
}
