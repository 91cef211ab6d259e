use super::models::{
    FeedEntry, PlayHistoryEntry, Reaction, ScoreReason, Song, Subscription, SubscriptionType,
    MAX_RECENT_PLAYS,
};
use super::schema::init_schema;
use super::trait_def::{
    BatchGetResult, FeedDataStore, FeedStore, HistoryStore, ReactionStore, SongStore,
    SubscriptionStore,
};
use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;
use tracing::info;

/// How many keys a single bulk-read statement carries.
const BATCH_GET_CHUNK: usize = 100;

/// Sqlite-backed implementation of all five store traits.
///
/// A single connection behind a Mutex; writes that touch multiple rows
/// (song index rows, feed replacement) run inside one transaction, so a
/// reader never observes a half-replaced feed.
pub struct SqliteFeedDataStore {
    conn: Mutex<Connection>,
}

impl SqliteFeedDataStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("opening database at {:?}", db_path.as_ref()))?;
        conn.execute("PRAGMA foreign_keys = ON;", [])?;
        init_schema(&conn)?;
        info!("Feed data store ready at {:?}", db_path.as_ref());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    #[cfg(test)]
    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn row_to_song(row: &rusqlite::Row) -> rusqlite::Result<(Song, String, String)> {
    Ok((
        Song {
            music_id: row.get(0)?,
            title: row.get(1)?,
            artist_ids: Vec::new(),
            genres: Vec::new(),
            album_id: row.get(4)?,
            file_key: row.get(5)?,
            cover_key: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        },
        row.get(2)?,
        row.get(3)?,
    ))
}

fn finish_song((mut song, artist_ids, genres): (Song, String, String)) -> Result<Song> {
    song.artist_ids = serde_json::from_str(&artist_ids)?;
    song.genres = serde_json::from_str(&genres)?;
    Ok(song)
}

const SONG_COLUMNS: &str =
    "music_id, title, artist_ids, genres, album_id, file_key, cover_key, created, updated";

impl SongStore for SqliteFeedDataStore {
    fn get_song(&self, music_id: &str) -> Result<Option<Song>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM song WHERE music_id = ?1",
            SONG_COLUMNS
        ))?;
        let mut rows = stmt.query_map(params![music_id], row_to_song)?;
        match rows.next() {
            Some(row) => Ok(Some(finish_song(row?)?)),
            None => Ok(None),
        }
    }

    fn put_song(&self, song: &Song) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO song (music_id, title, artist_ids, genres, album_id, file_key, cover_key, created, updated) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                song.music_id,
                song.title,
                serde_json::to_string(&song.artist_ids)?,
                serde_json::to_string(&song.genres)?,
                song.album_id,
                song.file_key,
                song.cover_key,
                song.created_at,
                song.updated_at,
            ],
        )?;
        tx.execute(
            "DELETE FROM song_genre WHERE music_id = ?1",
            params![song.music_id],
        )?;
        tx.execute(
            "DELETE FROM song_artist WHERE music_id = ?1",
            params![song.music_id],
        )?;
        for genre in &song.genres {
            tx.execute(
                "INSERT OR IGNORE INTO song_genre (music_id, genre) VALUES (?1, ?2)",
                params![song.music_id, genre],
            )?;
        }
        for artist_id in &song.artist_ids {
            tx.execute(
                "INSERT OR IGNORE INTO song_artist (music_id, artist_id) VALUES (?1, ?2)",
                params![song.music_id, artist_id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn delete_song(&self, music_id: &str) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM song WHERE music_id = ?1", params![music_id])?;
        tx.execute(
            "DELETE FROM song_genre WHERE music_id = ?1",
            params![music_id],
        )?;
        tx.execute(
            "DELETE FROM song_artist WHERE music_id = ?1",
            params![music_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn song_ids_by_genre(&self, genre: &str, limit: usize) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT music_id FROM song_genre WHERE genre = ?1 ORDER BY music_id LIMIT ?2",
        )?;
        let ids = stmt
            .query_map(params![genre, limit as i64], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    fn song_ids_by_artist(&self, artist_id: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT music_id FROM song_artist WHERE artist_id = ?1 ORDER BY music_id")?;
        let ids = stmt
            .query_map(params![artist_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    fn get_songs_batch(&self, music_ids: &[String]) -> Result<BatchGetResult> {
        #[cfg(feature = "slowdown")]
        std::thread::sleep(std::time::Duration::from_millis(50));

        let conn = self.conn.lock().unwrap();
        let mut found = HashMap::new();
        for chunk in music_ids.chunks(BATCH_GET_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM song WHERE music_id IN ({})",
                SONG_COLUMNS, placeholders
            ))?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(chunk.iter()), row_to_song)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            for row in rows {
                let song = finish_song(row)?;
                found.insert(song.music_id.clone(), song);
            }
        }
        // Local sqlite never throttles, all keys are processed in one round.
        Ok(BatchGetResult {
            found,
            unprocessed: Vec::new(),
        })
    }
}

impl SubscriptionStore for SqliteFeedDataStore {
    fn put_subscription(&self, subscription: &Subscription) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO subscription (user_id, subscription_type, target_id, created) VALUES (?1, ?2, ?3, ?4)",
            params![
                subscription.user_id,
                subscription.subscription_type.as_str(),
                subscription.target_id,
                subscription.created_at,
            ],
        )?;
        Ok(())
    }

    fn delete_subscription(
        &self,
        user_id: &str,
        subscription_type: SubscriptionType,
        target_id: &str,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM subscription WHERE user_id = ?1 AND subscription_type = ?2 AND target_id = ?3",
            params![user_id, subscription_type.as_str(), target_id],
        )?;
        Ok(())
    }

    fn subscriptions_for_user(&self, user_id: &str) -> Result<Vec<Subscription>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT user_id, subscription_type, target_id, created FROM subscription WHERE user_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![user_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(user_id, type_str, target_id, created_at)| {
                Ok(Subscription {
                    user_id,
                    subscription_type: SubscriptionType::from_str(&type_str)?,
                    target_id,
                    created_at,
                })
            })
            .collect()
    }

    fn subscribers_of(
        &self,
        subscription_type: SubscriptionType,
        target_id: &str,
    ) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT user_id FROM subscription WHERE subscription_type = ?1 AND target_id = ?2",
        )?;
        let ids = stmt
            .query_map(params![subscription_type.as_str(), target_id], |row| {
                row.get(0)
            })?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }
}

impl ReactionStore for SqliteFeedDataStore {
    fn put_reaction(&self, user_id: &str, music_id: &str, reaction: Reaction) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO reaction (user_id, music_id, rate) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id, music_id) DO UPDATE SET rate = ?3, updated = cast(strftime('%s','now') as int)",
            params![user_id, music_id, reaction.as_str()],
        )?;
        Ok(())
    }

    fn delete_reaction(&self, user_id: &str, music_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM reaction WHERE user_id = ?1 AND music_id = ?2",
            params![user_id, music_id],
        )?;
        Ok(())
    }

    fn reactions_for_user(&self, user_id: &str) -> Result<HashMap<String, Reaction>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT music_id, rate FROM reaction WHERE user_id = ?1")?;
        let rows = stmt
            .query_map(params![user_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(music_id, rate)| Ok((music_id, Reaction::from_str(&rate)?)))
            .collect()
    }
}

impl HistoryStore for SqliteFeedDataStore {
    fn recent_plays(&self, user_id: &str) -> Result<Vec<PlayHistoryEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT genre, played_at FROM play_history WHERE user_id = ?1 ORDER BY id",
        )?;
        let plays = stmt
            .query_map(params![user_id], |row| {
                Ok(PlayHistoryEntry {
                    genre: row.get(0)?,
                    played_at: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(plays)
    }

    fn record_play(&self, user_id: &str, entry: PlayHistoryEntry) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        // Append first, trim after.
        tx.execute(
            "INSERT INTO play_history (user_id, genre, played_at) VALUES (?1, ?2, ?3)",
            params![user_id, entry.genre, entry.played_at],
        )?;
        tx.execute(
            "DELETE FROM play_history WHERE user_id = ?1 AND id NOT IN
             (SELECT id FROM play_history WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2)",
            params![user_id, MAX_RECENT_PLAYS as i64],
        )?;
        tx.commit()?;
        Ok(())
    }
}

impl FeedStore for SqliteFeedDataStore {
    fn feed_for_user(&self, user_id: &str) -> Result<Vec<FeedEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT user_id, music_id, score, reason, created FROM feed WHERE user_id = ?1 ORDER BY score DESC, music_id",
        )?;
        let rows = stmt
            .query_map(params![user_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(user_id, music_id, score, reason, created_at)| {
                let reason: ScoreReason = serde_json::from_str(&reason)?;
                Ok(FeedEntry {
                    user_id,
                    music_id,
                    score,
                    reason,
                    created_at,
                })
            })
            .collect()
    }

    fn replace_feed(&self, user_id: &str, entries: &[FeedEntry]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM feed WHERE user_id = ?1", params![user_id])?;
        for entry in entries {
            tx.execute(
                "INSERT INTO feed (user_id, music_id, score, reason, created) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    user_id,
                    entry.music_id,
                    entry.score,
                    serde_json::to_string(&entry.reason)?,
                    entry.created_at,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

impl FeedDataStore for SqliteFeedDataStore {}
