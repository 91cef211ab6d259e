use super::context::InterestProfile;
use super::gatherer::gather_candidates;
use super::scorer::score_song;
use crate::store::{FeedDataStore, FeedEntry, FeedStore, Song, SongStore};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, warn};

/// Maximum number of entries kept in a user's feed (top-K).
pub const FEED_SIZE: usize = 50;

/// Rounds of resubmitting unprocessed keys during a bulk song fetch.
pub const BULK_FETCH_ATTEMPTS: usize = 5;

#[derive(Debug, Error)]
pub enum RecomputeError {
    #[error("failed to load interest profile for {user_id}: {source}")]
    LoadProfile {
        user_id: String,
        source: anyhow::Error,
    },

    #[error("failed to gather candidates for {user_id}: {source}")]
    GatherCandidates {
        user_id: String,
        source: anyhow::Error,
    },

    #[error("bulk song fetch failed for {user_id}: {source}")]
    FetchSongs {
        user_id: String,
        source: anyhow::Error,
    },

    #[error("failed to replace feed for {user_id}: {source}")]
    ReplaceFeed {
        user_id: String,
        source: anyhow::Error,
    },
}

/// Bulk fetch with a bounded retry policy over a partial-failure result.
/// Resubmits whatever the store reports as unprocessed, up to `attempts`
/// rounds. Returns the songs found and the keys still unresolved, which
/// callers treat as not found.
pub fn fetch_songs_with_retry<S: SongStore + ?Sized>(
    store: &S,
    music_ids: &[String],
    attempts: usize,
) -> anyhow::Result<(HashMap<String, Song>, Vec<String>)> {
    let mut found = HashMap::new();
    let mut pending: Vec<String> = music_ids.to_vec();
    for _ in 0..attempts {
        if pending.is_empty() {
            break;
        }
        let result = store.get_songs_batch(&pending)?;
        found.extend(result.found);
        pending = result.unprocessed;
    }
    Ok((found, pending))
}

/// Orchestrates one user's feed regeneration: load the interest profile,
/// gather candidates, score, rank, keep the top-K and replace the stored
/// feed. Recompute reads current stored state only, never the triggering
/// event, which makes it idempotent under duplicate delivery.
pub struct FeedEngine {
    store: Arc<dyn FeedDataStore>,
    // Serializes clear-then-write per user; concurrent recomputes for
    // different users are independent.
    user_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FeedEngine {
    pub fn new(store: Arc<dyn FeedDataStore>) -> Self {
        Self {
            store,
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    fn user_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.user_locks.lock().unwrap();
        locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Regenerates the user's feed and returns the number of stored
    /// entries. An empty candidate set clears the feed: a user who
    /// unsubscribes from everything ends up with an empty feed rather
    /// than a stale one.
    pub fn recompute(&self, user_id: &str) -> Result<usize, RecomputeError> {
        let store = self.store.as_ref();

        let profile =
            InterestProfile::load(store, user_id).map_err(|source| RecomputeError::LoadProfile {
                user_id: user_id.to_string(),
                source,
            })?;

        let candidates =
            gather_candidates(store, &profile).map_err(|source| {
                RecomputeError::GatherCandidates {
                    user_id: user_id.to_string(),
                    source,
                }
            })?;

        if candidates.is_empty() {
            debug!("No feed candidates for user {}", user_id);
            let lock = self.user_lock(user_id);
            let _guard = lock.lock().unwrap();
            self.store
                .replace_feed(user_id, &[])
                .map_err(|source| RecomputeError::ReplaceFeed {
                    user_id: user_id.to_string(),
                    source,
                })?;
            return Ok(0);
        }

        let candidate_ids: Vec<String> = candidates.into_iter().collect();
        let (songs, missing) =
            fetch_songs_with_retry(store, &candidate_ids, BULK_FETCH_ATTEMPTS).map_err(
                |source| RecomputeError::FetchSongs {
                    user_id: user_id.to_string(),
                    source,
                },
            )?;
        if !missing.is_empty() {
            // Tombstoned or throttled past the retry budget; degrade
            // gracefully instead of failing the whole recompute.
            warn!(
                "Skipping {} unresolved candidate(s) for user {}",
                missing.len(),
                user_id
            );
        }

        let created_at = chrono::Utc::now().timestamp();
        let mut entries: Vec<FeedEntry> = candidate_ids
            .iter()
            .filter_map(|music_id| songs.get(music_id))
            .map(|song| {
                let (score, reason) = score_song(song, &profile);
                FeedEntry {
                    user_id: user_id.to_string(),
                    music_id: song.music_id.clone(),
                    score,
                    reason,
                    created_at,
                }
            })
            .collect();

        // Rank: score descending, ties broken by ascending song id so
        // the result is reproducible.
        entries.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.music_id.cmp(&b.music_id))
        });
        entries.truncate(FEED_SIZE);

        let lock = self.user_lock(user_id);
        let _guard = lock.lock().unwrap();
        self.store
            .replace_feed(user_id, &entries)
            .map_err(|source| RecomputeError::ReplaceFeed {
                user_id: user_id.to_string(),
                source,
            })?;

        debug!("Recomputed feed for user {}: {} entries", user_id, entries.len());
        Ok(entries.len())
    }
}
