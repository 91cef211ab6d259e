//! Storage layer: domain records, per-concern store traits, a sqlite
//! implementation and an in-memory one for tests and demos.

mod memory_store;
mod models;
mod schema;
mod sqlite_store;
mod trait_def;

pub use memory_store::MemoryFeedDataStore;
pub use models::*;
pub use schema::VERSIONED_SCHEMAS;
pub use sqlite_store::SqliteFeedDataStore;
pub use trait_def::{
    BatchGetResult, FeedDataStore, FeedStore, HistoryStore, ReactionStore, SongStore,
    SubscriptionStore,
};
