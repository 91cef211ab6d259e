use super::context::InterestProfile;
use crate::store::{FeedDataStore, SongStore};
use anyhow::Result;
use std::collections::BTreeSet;

/// Pagination ceiling on the per-genre fan-out when gathering
/// candidates. Not a business rule, just a bound on unbounded genres.
pub const GENRE_FAN_OUT_LIMIT: usize = 200;

/// Assembles the de-duplicated set of song ids worth scoring for one
/// user. Union of three independent sources:
/// 1. songs indexed under the user's interest genres (subscribed or
///    recently played), bounded per genre;
/// 2. every song of each subscribed artist;
/// 3. every song the user reacted to, so reacted songs are represented
///    even outside the user's current subscriptions.
pub fn gather_candidates(
    store: &dyn FeedDataStore,
    profile: &InterestProfile,
) -> Result<BTreeSet<String>> {
    let mut candidates = BTreeSet::new();

    for genre in profile.interest_genres() {
        candidates.extend(store.song_ids_by_genre(&genre, GENRE_FAN_OUT_LIMIT)?);
    }

    for artist_id in &profile.subscribed_artists {
        candidates.extend(store.song_ids_by_artist(artist_id)?);
    }

    candidates.extend(profile.reactions.keys().cloned());

    Ok(candidates)
}
