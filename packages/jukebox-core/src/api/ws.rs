//! WebSocket handler for real-time client communication.

use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::sink::SinkExt;
use futures::stream::{SplitSink, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;

use crate::api::http::ban_vote_request;
use crate::api::AppState;
use crate::error::JukeboxError;
use crate::events::{BroadcastEvent, VoteEvent};
use crate::services::vote_manager::{Ballot, VoteSummary};
use crate::state::QueueState;
use crate::utils::now_millis;

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket Message Types
// ─────────────────────────────────────────────────────────────────────────────

/// Incoming WebSocket message envelope.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
enum WsIncoming {
    Identify { payload: IdentifyPayload },
    Heartbeat,
    StartBanVote { payload: StartBanVotePayload },
    CastBanVote { payload: CastBanVotePayload },
    GetState,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentifyPayload {
    user_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartBanVotePayload {
    track_uri: String,
    #[serde(default)]
    track_name: Option<String>,
    #[serde(default)]
    track_artist: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CastBanVotePayload {
    vote_id: String,
    vote: Ballot,
}

/// Outgoing WebSocket messages.
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
enum WsOutgoing {
    InitialState { payload: InitialStatePayload },
    HeartbeatAck,
    Error { message: String },
}

/// Snapshot sent on connect and on `GET_STATE`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InitialStatePayload {
    state: QueueState,
    active_vote: Option<VoteSummary>,
    user_count: u32,
}

impl WsOutgoing {
    /// Serializes the message to a WebSocket text message.
    fn to_message(&self) -> Option<Message> {
        serde_json::to_string(self)
            .ok()
            .map(|s| Message::Text(s.into()))
    }
}

type WsSender = SplitSink<WebSocket, Message>;

/// Sends a serialized event to this client only.
async fn send_event(sender: &mut WsSender, event: &BroadcastEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            log::warn!("[WS] Failed to encode {}: {}", event.event_name(), e);
            true
        }
    }
}

/// Reports a vote rejection to the requesting client as `banVoteError`.
async fn send_vote_error(sender: &mut WsSender, err: &JukeboxError) {
    let event = BroadcastEvent::Vote(vote_error_event(err));
    let _ = send_event(sender, &event).await;
}

fn vote_error_event(err: &JukeboxError) -> VoteEvent {
    VoteEvent::BanVoteError {
        code: err.code(),
        message: err.to_string(),
        timestamp: now_millis(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket Message Handlers
// ─────────────────────────────────────────────────────────────────────────────

fn build_initial_state(state: &AppState) -> WsOutgoing {
    WsOutgoing::InitialState {
        payload: InitialStatePayload {
            state: state.queue_service.get_current_state(),
            active_vote: state.vote_manager.active_vote(),
            user_count: state.ws_manager.online_count(),
        },
    }
}

async fn handle_start_vote(
    state: &AppState,
    user_id: Option<String>,
    payload: StartBanVotePayload,
) -> Result<(), JukeboxError> {
    let user_id = user_id.ok_or_else(|| JukeboxError::InvalidRequest {
        code: "not_identified",
        message: "Send IDENTIFY before starting a vote".into(),
    })?;
    let request = ban_vote_request(
        &state.queue_service.get_current_state(),
        &payload.track_uri,
        payload.track_name,
        payload.track_artist,
        &user_id,
    )?;
    let online = state.ws_manager.online_count();
    state.vote_manager.start_ban_vote(request, online).await?;
    Ok(())
}

async fn handle_cast_vote(
    state: &AppState,
    user_id: Option<String>,
    payload: CastBanVotePayload,
) -> Result<(), JukeboxError> {
    let user_id = user_id.ok_or_else(|| JukeboxError::InvalidRequest {
        code: "not_identified",
        message: "Send IDENTIFY before voting".into(),
    })?;
    state
        .vote_manager
        .cast_vote(&payload.vote_id, &user_id, payload.vote)
        .await?;
    Ok(())
}

/// WebSocket upgrade handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

/// Main WebSocket connection handler.
async fn handle_ws(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut broadcast_rx = state.event_bridge.subscribe();
    let mut last_activity = Instant::now();

    let (timeout, check_interval) = {
        let config = state.config.read();
        (
            Duration::from_secs(config.ws_heartbeat_timeout_secs),
            Duration::from_secs(config.ws_heartbeat_check_interval_secs),
        )
    };

    // Register connection for tracking, presence and force-close
    let conn_guard = state.ws_manager.register();
    let cancel_token = conn_guard.cancel_token().clone();

    log::info!("[WS] New connection established: {}", conn_guard.id());

    if let Some(msg) = build_initial_state(&state).to_message() {
        if sender.send(msg).await.is_err() {
            log::warn!("[WS] Failed to send initial state, client disconnected");
            return;
        }
    }

    // Delay mode skips missed ticks rather than bursting to catch up.
    let mut heartbeat_interval = tokio::time::interval(check_interval);
    heartbeat_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                log::info!("[WS] Connection force-closed: {}", conn_guard.id());
                break;
            }
            msg = receiver.next() => {
                last_activity = Instant::now();
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<WsIncoming>(&text) {
                            Ok(WsIncoming::Identify { payload }) => {
                                state.ws_manager.identify(conn_guard.id(), &payload.user_id);
                            }
                            Ok(WsIncoming::Heartbeat) => {
                                if let Some(msg) = WsOutgoing::HeartbeatAck.to_message() {
                                    let _ = sender.send(msg).await;
                                }
                            }
                            Ok(WsIncoming::StartBanVote { payload }) => {
                                let user = state.ws_manager.user_of(conn_guard.id());
                                if let Err(e) = handle_start_vote(&state, user, payload).await {
                                    log::debug!("[WS] Ban vote rejected: {}", e);
                                    send_vote_error(&mut sender, &e).await;
                                }
                            }
                            Ok(WsIncoming::CastBanVote { payload }) => {
                                let user = state.ws_manager.user_of(conn_guard.id());
                                if let Err(e) = handle_cast_vote(&state, user, payload).await {
                                    log::debug!("[WS] Ballot rejected: {}", e);
                                    send_vote_error(&mut sender, &e).await;
                                }
                            }
                            Ok(WsIncoming::GetState) => {
                                if let Some(msg) = build_initial_state(&state).to_message() {
                                    let _ = sender.send(msg).await;
                                }
                            }
                            Err(e) => {
                                log::debug!("[WS] Ignoring unrecognized message: {}", e);
                                let err = WsOutgoing::Error {
                                    message: "Unrecognized message".into(),
                                };
                                if let Some(msg) = err.to_message() {
                                    let _ = sender.send(msg).await;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
            event = broadcast_rx.recv() => {
                match event {
                    Ok(event) => {
                        if !send_event(&mut sender, &event).await {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        // The next queueUpdate carries the full state again.
                        log::warn!("[WS] {} lagged, skipped {} event(s)", conn_guard.id(), n);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            _ = heartbeat_interval.tick() => {
                if last_activity.elapsed() > timeout {
                    log::warn!("[WS] Heartbeat timeout: {}", conn_guard.id());
                    break;
                }
            }
        }
    }

    // ConnectionGuard drop unregisters and updates the online count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_identify() {
        let msg: WsIncoming =
            serde_json::from_str(r#"{"type":"IDENTIFY","payload":{"userId":"alice"}}"#).unwrap();
        match msg {
            WsIncoming::Identify { payload } => assert_eq!(payload.user_id, "alice"),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn parses_ballot() {
        let msg: WsIncoming = serde_json::from_str(
            r#"{"type":"CAST_BAN_VOTE","payload":{"voteId":"v1","vote":"no"}}"#,
        )
        .unwrap();
        match msg {
            WsIncoming::CastBanVote { payload } => {
                assert_eq!(payload.vote_id, "v1");
                assert_eq!(payload.vote, Ballot::No);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn start_vote_details_are_optional() {
        let msg: WsIncoming = serde_json::from_str(
            r#"{"type":"START_BAN_VOTE","payload":{"trackUri":"spotify:track:x"}}"#,
        )
        .unwrap();
        assert!(matches!(
            msg,
            WsIncoming::StartBanVote { payload } if payload.track_name.is_none()
        ));
    }

    #[test]
    fn unit_messages_parse() {
        assert!(matches!(
            serde_json::from_str::<WsIncoming>(r#"{"type":"HEARTBEAT"}"#).unwrap(),
            WsIncoming::Heartbeat
        ));
        assert!(matches!(
            serde_json::from_str::<WsIncoming>(r#"{"type":"GET_STATE"}"#).unwrap(),
            WsIncoming::GetState
        ));
    }

    #[test]
    fn heartbeat_ack_shape() {
        let json = serde_json::to_value(WsOutgoing::HeartbeatAck).unwrap();
        assert_eq!(json["type"], "HEARTBEAT_ACK");
    }

    #[test]
    fn vote_errors_carry_code() {
        let event = BroadcastEvent::Vote(vote_error_event(&JukeboxError::Conflict {
            code: "already_voted",
            message: "You have already voted".into(),
        }));
        assert_eq!(event.event_name(), "banVoteError");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "banVoteError");
        assert_eq!(json["code"], "already_voted");
        assert_eq!(json["message"], "You have already voted");
    }
}
