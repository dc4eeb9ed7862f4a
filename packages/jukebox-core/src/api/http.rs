//! HTTP route handlers.
//!
//! All handlers are thin - they delegate to services for business logic.
//! Identity, anonymity and the payment flag arrive in the request body from
//! the session/billing collaborator in front of this server.

use std::convert::Infallible;

use axum::{
    extract::{Path, Query, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

use crate::api::response::api_success;
use crate::api::ws::ws_handler;
use crate::api::AppState;
use crate::error::{JukeboxError, JukeboxResult};
use crate::protocol_constants::SERVICE_ID;
use crate::services::queue_service::{Requester, SkipOutcome};
use crate::services::vote_manager::{Ballot, BanVoteRequest};
use crate::state::QueueState;
use crate::utils::validate_track_uri;

// ─────────────────────────────────────────────────────────────────────────────
// Request Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddToQueueRequest {
    uri: String,
    user_id: String,
    #[serde(default)]
    anonymous: bool,
    #[serde(default)]
    payment_captured: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SkipRequest {
    track_uri: String,
    user_id: String,
    #[serde(default)]
    payment_captured: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShieldRequest {
    track_uri: String,
    /// Targets one queued instance; the oldest when absent.
    #[serde(default)]
    added_at: Option<u64>,
    user_id: String,
    #[serde(default)]
    payment_captured: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartVoteRequest {
    track_uri: String,
    #[serde(default)]
    track_name: Option<String>,
    #[serde(default)]
    track_artist: Option<String>,
    user_id: String,
}

#[derive(Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BallotRequest {
    user_id: String,
    vote: Ballot,
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Paid actions need the collaborator's confirmation first.
fn require_payment(captured: bool) -> JukeboxResult<()> {
    if captured {
        Ok(())
    } else {
        Err(JukeboxError::PaymentRequired)
    }
}

fn require_user(user_id: &str) -> JukeboxResult<&str> {
    let user_id = user_id.trim();
    if user_id.is_empty() {
        return Err(JukeboxError::invalid("userId is required"));
    }
    Ok(user_id)
}

/// Builds a vote request, filling missing track details from the queue view.
pub(crate) fn ban_vote_request(
    queue: &QueueState,
    track_uri: &str,
    track_name: Option<String>,
    track_artist: Option<String>,
    initiator: &str,
) -> JukeboxResult<BanVoteRequest> {
    validate_track_uri(track_uri)?;
    let uri = track_uri.trim();
    let known = queue
        .current_track
        .as_ref()
        .map(|c| &c.item.track)
        .into_iter()
        .chain(queue.queue.iter().map(|item| &item.track))
        .find(|track| track.uri == uri);

    let track_name = track_name
        .filter(|n| !n.trim().is_empty())
        .or_else(|| known.map(|t| t.name.clone()))
        .unwrap_or_else(|| uri.to_string());
    let track_artist = track_artist
        .filter(|a| !a.trim().is_empty())
        .or_else(|| known.map(|t| t.artist_line()))
        .unwrap_or_else(|| "Unknown artist".to_string());

    Ok(BanVoteRequest {
        track_uri: uri.to_string(),
        track_name,
        track_artist,
        initiator: initiator.to_string(),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

/// Creates the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/state", get(get_current_state))
        .route("/api/search", get(search_tracks))
        .route("/api/queue", post(add_to_queue))
        .route("/api/skip", post(skip_current_track))
        .route("/api/shields", post(add_shield))
        .route("/api/votes/active", get(get_active_vote))
        .route("/api/votes", post(start_ban_vote))
        .route("/api/votes/{id}/ballots", post(cast_ballot))
        .route("/api/bans", get(list_bans))
        .route("/api/events", get(event_stream))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Liveness probe.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    api_success(json!({
        "status": "ok",
        "service": SERVICE_ID,
        "connections": state.ws_manager.connection_count(),
        "onlineUsers": state.ws_manager.online_count(),
    }))
}

/// Last broadcast queue state plus vote and presence. Never calls the provider.
async fn get_current_state(State(state): State<AppState>) -> impl IntoResponse {
    api_success(json!({
        "state": state.queue_service.get_current_state(),
        "activeVote": state.vote_manager.active_vote(),
        "userCount": state.ws_manager.online_count(),
    }))
}

/// GET /api/search?q=
async fn search_tracks(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> JukeboxResult<Response> {
    let tracks = state.queue_service.search(&params.q).await?;
    Ok(api_success(json!({ "tracks": tracks })))
}

/// POST /api/queue
async fn add_to_queue(
    State(state): State<AppState>,
    Json(payload): Json<AddToQueueRequest>,
) -> JukeboxResult<Response> {
    let user_id = require_user(&payload.user_id)?;
    require_payment(payload.payment_captured)?;

    let requester = Requester {
        user_id: user_id.to_string(),
        anonymous: payload.anonymous,
    };
    let outcome = state
        .queue_service
        .add_to_queue(&payload.uri, &requester)
        .await?;

    Ok(api_success(json!({
        "track": outcome.item,
        "state": outcome.state,
    })))
}

/// POST /api/skip
///
/// A shielded track answers 200 with `blocked: true`; the purchase was
/// spent on the shield.
async fn skip_current_track(
    State(state): State<AppState>,
    Json(payload): Json<SkipRequest>,
) -> JukeboxResult<Response> {
    let user_id = require_user(&payload.user_id)?;
    require_payment(payload.payment_captured)?;

    log::info!("[Queue] Skip of {} requested by {}", payload.track_uri, user_id);
    let body = match state
        .queue_service
        .skip_current_track(&payload.track_uri)
        .await?
    {
        SkipOutcome::Skipped { state } => json!({ "blocked": false, "state": state }),
        SkipOutcome::Blocked {
            shields_remaining,
            state,
        } => json!({
            "blocked": true,
            "shieldsRemaining": shields_remaining,
            "state": state,
        }),
    };
    Ok(api_success(body))
}

/// POST /api/shields
async fn add_shield(
    State(state): State<AppState>,
    Json(payload): Json<ShieldRequest>,
) -> JukeboxResult<Response> {
    require_user(&payload.user_id)?;
    require_payment(payload.payment_captured)?;

    let entry = state
        .queue_service
        .add_shield(&payload.track_uri, payload.added_at)
        .await?;
    Ok(api_success(json!({
        "trackUri": entry.track_uri,
        "addedAt": entry.added_at,
        "shieldCount": entry.shield_count,
    })))
}

async fn get_active_vote(State(state): State<AppState>) -> impl IntoResponse {
    api_success(json!({ "vote": state.vote_manager.active_vote() }))
}

/// POST /api/votes
async fn start_ban_vote(
    State(state): State<AppState>,
    Json(payload): Json<StartVoteRequest>,
) -> JukeboxResult<Response> {
    let user_id = require_user(&payload.user_id)?;
    let request = ban_vote_request(
        &state.queue_service.get_current_state(),
        &payload.track_uri,
        payload.track_name,
        payload.track_artist,
        user_id,
    )?;
    let online = state.ws_manager.online_count();
    let summary = state.vote_manager.start_ban_vote(request, online).await?;
    Ok(api_success(json!({ "vote": summary })))
}

/// POST /api/votes/{id}/ballots
async fn cast_ballot(
    State(state): State<AppState>,
    Path(vote_id): Path<String>,
    Json(payload): Json<BallotRequest>,
) -> JukeboxResult<Response> {
    let user_id = require_user(&payload.user_id)?;
    let outcome = state
        .vote_manager
        .cast_vote(&vote_id, user_id, payload.vote)
        .await?;
    Ok(api_success(json!({ "outcome": outcome })))
}

async fn list_bans(State(state): State<AppState>) -> JukeboxResult<Response> {
    let bans = state.bans.list_bans().await?;
    Ok(api_success(json!({ "bans": bans })))
}

/// GET /api/events
///
/// Server-sent events for display clients that do not speak WebSocket.
/// Each SSE `event:` name is the wire name of the broadcast event.
async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.event_bridge.subscribe()).filter_map(|item| async move {
        match item {
            Ok(event) => match Event::default().event(event.event_name()).json_data(&event) {
                Ok(sse) => Some(Ok(sse)),
                Err(e) => {
                    log::warn!("[SSE] Failed to encode {}: {}", event.event_name(), e);
                    None
                }
            },
            Err(BroadcastStreamRecvError::Lagged(n)) => {
                log::warn!("[SSE] Client lagged, skipped {} event(s)", n);
                None
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
