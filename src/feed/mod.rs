//! The feed recomputation core: interest profile, candidate gathering,
//! weighted scoring and the engine that ties them together.

mod context;
mod engine;
mod gatherer;
mod scorer;

pub use context::InterestProfile;
pub use engine::{fetch_songs_with_retry, FeedEngine, RecomputeError, BULK_FETCH_ATTEMPTS, FEED_SIZE};
pub use gatherer::{gather_candidates, GENRE_FAN_OUT_LIMIT};
pub use scorer::{
    score_song, ARTIST_MATCH_WEIGHT, DISLIKE_PENALTY, GENRE_MATCH_WEIGHT, HISTORY_PLAY_WEIGHT,
    LIKE_BONUS, LOVE_BONUS,
};
