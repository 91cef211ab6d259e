use super::context::InterestProfile;
use crate::store::{Reaction, ScoreReason, Song};

/// Per matching genre between the song and the user's subscribed genres.
pub const GENRE_MATCH_WEIGHT: f64 = 7.0;
/// Per matching artist between the song and the user's subscribed artists.
pub const ARTIST_MATCH_WEIGHT: f64 = 15.0;
/// Per historical play of one of the song's genres.
pub const HISTORY_PLAY_WEIGHT: f64 = 0.7;
pub const LOVE_BONUS: f64 = 20.0;
pub const LIKE_BONUS: f64 = 10.0;
/// A dislike is near-absolute suppression, not a mild penalty.
pub const DISLIKE_PENALTY: f64 = -200.0;

/// Computes the relevance score of one song for one user, plus the
/// explanation record persisted with the feed entry.
///
/// The total is unbounded and unclamped; negative scores are valid and
/// expected for disliked content. Matches accumulate: a multi-genre song
/// earns the genre weight once per matching genre.
pub fn score_song(song: &Song, profile: &InterestProfile) -> (f64, ScoreReason) {
    let mut score = 0.0;

    let matched_genres: Vec<String> = song
        .genres
        .iter()
        .filter(|genre| profile.subscribed_genres.contains(*genre))
        .cloned()
        .collect();
    score += matched_genres.len() as f64 * GENRE_MATCH_WEIGHT;

    let matched_artists: Vec<String> = song
        .artist_ids
        .iter()
        .filter(|artist| profile.subscribed_artists.contains(*artist))
        .cloned()
        .collect();
    score += matched_artists.len() as f64 * ARTIST_MATCH_WEIGHT;

    let history_boost: f64 = song
        .genres
        .iter()
        .filter_map(|genre| profile.genre_plays.get(genre))
        .map(|count| *count as f64 * HISTORY_PLAY_WEIGHT)
        .sum();
    score += history_boost;

    let reaction = profile.reactions.get(&song.music_id).copied();
    score += match reaction {
        Some(Reaction::Love) => LOVE_BONUS,
        Some(Reaction::Like) => LIKE_BONUS,
        Some(Reaction::Dislike) => DISLIKE_PENALTY,
        None => 0.0,
    };

    let reason = ScoreReason {
        matched_genres,
        matched_artists,
        history_boost,
        reaction,
        song_genres: song.genres.clone(),
    };
    (score, reason)
}
