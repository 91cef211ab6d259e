use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum number of entries kept in a user's recent-plays list.
/// Oldest entries are evicted first (append-then-trim).
pub const MAX_RECENT_PLAYS: usize = 40;

/// A track in the catalog. Identity (`music_id`) is immutable,
/// metadata is mutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Song {
    pub music_id: String,
    pub title: String,
    #[serde(default)]
    pub artist_ids: Vec<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub album_id: Option<String>,
    #[serde(default)]
    pub file_key: Option<String>,
    #[serde(default)]
    pub cover_key: Option<String>,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionType {
    Artist,
    Genre,
}

impl SubscriptionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionType::Artist => "artist",
            SubscriptionType::Genre => "genre",
        }
    }
}

impl FromStr for SubscriptionType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "artist" => Ok(SubscriptionType::Artist),
            "genre" => Ok(SubscriptionType::Genre),
            other => Err(anyhow::anyhow!("unknown subscription type: {}", other)),
        }
    }
}

impl fmt::Display for SubscriptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A presence/absence fact: the user follows an artist or a genre.
/// There is no update operation, only create and delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub user_id: String,
    pub subscription_type: SubscriptionType,
    pub target_id: String,
    pub created_at: i64,
}

/// A user's explicit sentiment toward one song.
/// At most one per (user, song), latest write wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reaction {
    Love,
    Like,
    Dislike,
}

impl Reaction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reaction::Love => "love",
            Reaction::Like => "like",
            Reaction::Dislike => "dislike",
        }
    }
}

impl FromStr for Reaction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "love" => Ok(Reaction::Love),
            "like" => Ok(Reaction::Like),
            "dislike" => Ok(Reaction::Dislike),
            other => Err(anyhow::anyhow!("unknown reaction: {}", other)),
        }
    }
}

impl fmt::Display for Reaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayHistoryEntry {
    pub genre: String,
    pub played_at: i64,
}

/// Why a song ended up in the feed. Persisted alongside the score so
/// every entry is auditable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ScoreReason {
    pub matched_genres: Vec<String>,
    pub matched_artists: Vec<String>,
    pub history_boost: f64,
    pub reaction: Option<Reaction>,
    pub song_genres: Vec<String>,
}

/// One row of a user's persisted feed. The per-user set of these is
/// fully owned by the recomputation engine: a recompute replaces all of
/// them, nothing survives unless it is re-selected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedEntry {
    pub user_id: String,
    pub music_id: String,
    pub score: f64,
    pub reason: ScoreReason,
    pub created_at: i64,
}
