//! HTTP surface. Identity is established upstream (gateway / identity
//! provider); callers pass the resolved user id in the `x-user-id`
//! header.

use crate::actions::Actions;
use crate::feed::fetch_songs_with_retry;
use crate::feed::BULK_FETCH_ATTEMPTS;
use crate::store::{FeedDataStore, FeedStore, Reaction, Song, SubscriptionStore, SubscriptionType};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;
use tracing::error;

#[derive(Clone)]
pub struct ServerState {
    pub store: Arc<dyn FeedDataStore>,
    pub actions: Arc<Actions>,
}

fn user_id_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-user-id")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({"error": "Unauthorized"}))).into_response()
}

fn internal_error(err: anyhow::Error) -> Response {
    error!("Request failed: {:#}", err);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": err.to_string()})),
    )
        .into_response()
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FeedItem {
    music_id: String,
    score: f64,
    reason: crate::store::ScoreReason,
    song: Option<Song>,
}

async fn get_feed(headers: HeaderMap, State(state): State<ServerState>) -> Response {
    let Some(user_id) = user_id_from_headers(&headers) else {
        return unauthorized();
    };
    let entries = match state.store.feed_for_user(&user_id) {
        Ok(entries) => entries,
        Err(err) => return internal_error(err),
    };
    let ids: Vec<String> = entries.iter().map(|e| e.music_id.clone()).collect();
    let songs = match fetch_songs_with_retry(state.store.as_ref(), &ids, BULK_FETCH_ATTEMPTS) {
        Ok((songs, _missing)) => songs,
        Err(err) => return internal_error(err),
    };
    let items: Vec<FeedItem> = entries
        .into_iter()
        .map(|entry| FeedItem {
            song: songs.get(&entry.music_id).cloned(),
            music_id: entry.music_id,
            score: entry.score,
            reason: entry.reason,
        })
        .collect();
    Json(json!({"feed": items, "feedCount": items.len()})).into_response()
}

#[derive(Deserialize)]
struct SubscribeBody {
    #[serde(rename = "type")]
    subscription_type: SubscriptionType,
    id: String,
}

async fn post_subscription(
    headers: HeaderMap,
    State(state): State<ServerState>,
    Json(body): Json<SubscribeBody>,
) -> Response {
    let Some(user_id) = user_id_from_headers(&headers) else {
        return unauthorized();
    };
    if body.id.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "id is required"})),
        )
            .into_response();
    }
    match state
        .actions
        .subscribe(&user_id, body.subscription_type, &body.id)
        .await
    {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(err) => internal_error(err),
    }
}

async fn get_subscriptions(headers: HeaderMap, State(state): State<ServerState>) -> Response {
    let Some(user_id) = user_id_from_headers(&headers) else {
        return unauthorized();
    };
    match state.store.subscriptions_for_user(&user_id) {
        Ok(subscriptions) => {
            let (artists, genres): (Vec<_>, Vec<_>) = subscriptions
                .into_iter()
                .partition(|s| s.subscription_type == SubscriptionType::Artist);
            Json(json!({
                "artistSubscriptions": artists,
                "genreSubscriptions": genres,
            }))
            .into_response()
        }
        Err(err) => internal_error(err),
    }
}

async fn delete_subscription(
    headers: HeaderMap,
    State(state): State<ServerState>,
    Path((type_str, target_id)): Path<(String, String)>,
) -> Response {
    let Some(user_id) = user_id_from_headers(&headers) else {
        return unauthorized();
    };
    let Ok(subscription_type) = SubscriptionType::from_str(&type_str) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "type must be artist or genre"})),
        )
            .into_response();
    };
    match state
        .actions
        .unsubscribe(&user_id, subscription_type, &target_id)
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => internal_error(err),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RateBody {
    music_id: String,
    rate: Reaction,
}

async fn post_rate(
    headers: HeaderMap,
    State(state): State<ServerState>,
    Json(body): Json<RateBody>,
) -> Response {
    let Some(user_id) = user_id_from_headers(&headers) else {
        return unauthorized();
    };
    match state.actions.rate(&user_id, &body.music_id, body.rate).await {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(err) => internal_error(err),
    }
}

async fn delete_rate(
    headers: HeaderMap,
    State(state): State<ServerState>,
    Path(music_id): Path<String>,
) -> Response {
    let Some(user_id) = user_id_from_headers(&headers) else {
        return unauthorized();
    };
    match state.actions.unrate(&user_id, &music_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => internal_error(err),
    }
}

#[derive(Deserialize)]
struct PlayBody {
    genre: String,
}

async fn post_play(
    headers: HeaderMap,
    State(state): State<ServerState>,
    Json(body): Json<PlayBody>,
) -> Response {
    let Some(user_id) = user_id_from_headers(&headers) else {
        return unauthorized();
    };
    if body.genre.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "genre is required"})),
        )
            .into_response();
    }
    match state.actions.record_play(&user_id, &body.genre).await {
        Ok(history) => Json(json!({"message": "Play recorded", "history": history})).into_response(),
        Err(err) => internal_error(err),
    }
}

async fn post_song(State(state): State<ServerState>, Json(song): Json<Song>) -> Response {
    if song.music_id.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "musicId is required"})),
        )
            .into_response();
    }
    match state.actions.add_song(&song).await {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(err) => internal_error(err),
    }
}

async fn delete_song(State(state): State<ServerState>, Path(music_id): Path<String>) -> Response {
    match state.actions.remove_song(&music_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => internal_error(err),
    }
}

pub fn make_router(state: ServerState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/feed", get(get_feed))
        .route("/subscriptions", get(get_subscriptions).post(post_subscription))
        .route("/subscriptions/{type}/{id}", delete(delete_subscription))
        .route("/rates", post(post_rate))
        .route("/rates/{music_id}", delete(delete_rate))
        .route("/plays", post(post_play))
        .route("/songs", post(post_song))
        .route("/songs/{music_id}", delete(delete_song))
        .with_state(state)
}
