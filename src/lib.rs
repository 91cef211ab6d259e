//! tunefeed: feed recomputation service for a music-streaming backend.
//!
//! Fact mutations (subscriptions, reactions, plays, catalog changes)
//! enqueue recompute triggers; a batch consumer coalesces them per user
//! and regenerates that user's ranked feed from current stored state.

pub mod actions;
pub mod config;
pub mod feed;
pub mod queue;
pub mod server;
pub mod store;
