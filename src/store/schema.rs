use anyhow::{bail, Result};
use rusqlite::Connection;

pub struct Table {
    pub name: &'static str,
    pub schema: &'static str,
    pub indices: &'static [&'static str],
}

const SONG_TABLE_V_0: Table = Table {
    name: "song",
    schema: "CREATE TABLE song (music_id TEXT NOT NULL UNIQUE, title TEXT NOT NULL, artist_ids TEXT NOT NULL, genres TEXT NOT NULL, album_id TEXT, file_key TEXT, cover_key TEXT, created INTEGER DEFAULT (cast(strftime('%s','now') as int)), updated INTEGER DEFAULT (cast(strftime('%s','now') as int)), PRIMARY KEY (music_id));",
    indices: &[],
};
const SONG_GENRE_TABLE_V_0: Table = Table {
    name: "song_genre",
    schema: "CREATE TABLE song_genre (music_id TEXT NOT NULL, genre TEXT NOT NULL, UNIQUE(music_id, genre));",
    indices: &["CREATE INDEX song_genre_index ON song_genre (genre);"],
};
const SONG_ARTIST_TABLE_V_0: Table = Table {
    name: "song_artist",
    schema: "CREATE TABLE song_artist (music_id TEXT NOT NULL, artist_id TEXT NOT NULL, UNIQUE(music_id, artist_id));",
    indices: &["CREATE INDEX song_artist_index ON song_artist (artist_id);"],
};
const SUBSCRIPTION_TABLE_V_0: Table = Table {
    name: "subscription",
    schema: "CREATE TABLE subscription (user_id TEXT NOT NULL, subscription_type TEXT NOT NULL, target_id TEXT NOT NULL, created INTEGER DEFAULT (cast(strftime('%s','now') as int)), UNIQUE(user_id, subscription_type, target_id));",
    indices: &[
        "CREATE INDEX subscription_user_index ON subscription (user_id);",
        "CREATE INDEX subscription_target_index ON subscription (subscription_type, target_id);",
    ],
};
const REACTION_TABLE_V_0: Table = Table {
    name: "reaction",
    schema: "CREATE TABLE reaction (user_id TEXT NOT NULL, music_id TEXT NOT NULL, rate TEXT NOT NULL, created INTEGER DEFAULT (cast(strftime('%s','now') as int)), updated INTEGER DEFAULT (cast(strftime('%s','now') as int)), UNIQUE(user_id, music_id));",
    indices: &["CREATE INDEX reaction_user_index ON reaction (user_id);"],
};
const PLAY_HISTORY_TABLE_V_0: Table = Table {
    name: "play_history",
    schema: "CREATE TABLE play_history (id INTEGER NOT NULL UNIQUE, user_id TEXT NOT NULL, genre TEXT NOT NULL, played_at INTEGER NOT NULL, PRIMARY KEY (id));",
    indices: &["CREATE INDEX play_history_user_index ON play_history (user_id);"],
};
const FEED_TABLE_V_0: Table = Table {
    name: "feed",
    schema: "CREATE TABLE feed (user_id TEXT NOT NULL, music_id TEXT NOT NULL, score REAL NOT NULL, reason TEXT NOT NULL, created INTEGER DEFAULT (cast(strftime('%s','now') as int)), UNIQUE(user_id, music_id));",
    indices: &["CREATE INDEX feed_user_index ON feed (user_id);"],
};

pub struct VersionedSchema {
    pub version: u32,
    pub tables: &'static [Table],
}

pub const VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[
        SONG_TABLE_V_0,
        SONG_GENRE_TABLE_V_0,
        SONG_ARTIST_TABLE_V_0,
        SUBSCRIPTION_TABLE_V_0,
        REACTION_TABLE_V_0,
        PLAY_HISTORY_TABLE_V_0,
        FEED_TABLE_V_0,
    ],
}];

fn current_schema() -> &'static VersionedSchema {
    // VERSIONED_SCHEMAS is never empty
    VERSIONED_SCHEMAS.last().unwrap()
}

fn user_version(conn: &Connection) -> Result<u32> {
    let version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    Ok(version)
}

/// Creates the schema on a fresh database, or verifies the stored
/// version on an existing one.
pub fn init_schema(conn: &Connection) -> Result<()> {
    let schema = current_schema();
    let stored = user_version(conn)?;
    if stored == 0 {
        for table in schema.tables {
            conn.execute(table.schema, [])?;
            for index in table.indices {
                conn.execute(index, [])?;
            }
        }
        conn.execute(&format!("PRAGMA user_version = {}", schema.version), [])?;
        return Ok(());
    }
    if stored != schema.version {
        bail!(
            "unsupported database version {} (expected {})",
            stored,
            schema.version
        );
    }
    Ok(())
}
