//! WebSocket endpoint for interactive meeting execution.
//!
//! Protocol:
//!
//! Client → server:
//! - `{"type": "start_round", "rounds": 1, "topic": "...", "locale": "..."}`
//! - `{"type": "user_message", "content": "..."}`
//!
//! Server → client: `agent_speaking`, `message`, `round_complete`,
//! `meeting_complete`, `message_saved`, and `error` frames.
//!
//! `start_round` launches the shared background worker and forwards bus
//! events to the socket until the run reaches a terminal event (or stops
//! producing events after cancellation).

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use serde_json::{json, Value};
use tokio::time::Duration;

use crate::bus::MeetingEvent;
use crate::models::MeetingMessage;
use crate::runner::RunOptions;

use super::AppState;

/// How long the forward loop waits for the next event before checking
/// whether the worker is still alive.
const FORWARD_POLL: Duration = Duration::from_millis(500);

pub async fn ws_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(state, id, socket))
}

async fn send_json(socket: &mut WebSocket, value: Value) -> bool {
    let text = value.to_string();
    socket.send(Message::Text(text.into())).await.is_ok()
}

async fn send_error(socket: &mut WebSocket, detail: &str) -> bool {
    send_json(socket, json!({"type": "error", "detail": detail})).await
}

async fn handle_socket(state: AppState, meeting_id: String, mut socket: WebSocket) {
    match state.store.get_meeting(&meeting_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            let _ = send_error(&mut socket, "Meeting not found").await;
            return;
        }
        Err(e) => {
            log::error!("ws: store error loading meeting {meeting_id}: {e}");
            let _ = send_error(&mut socket, "Internal error").await;
            return;
        }
    }

    while let Some(Ok(frame)) = socket.recv().await {
        let text = match frame {
            Message::Text(t) => t,
            Message::Close(_) => break,
            _ => continue,
        };
        let data: Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(_) => {
                if !send_error(&mut socket, "Malformed JSON message").await {
                    return;
                }
                continue;
            }
        };

        match data.get("type").and_then(Value::as_str) {
            Some("user_message") => {
                if !handle_user_message(&state, &meeting_id, &data, &mut socket).await {
                    return;
                }
            }
            Some("start_round") => {
                if !handle_start_round(&state, &meeting_id, &data, &mut socket).await {
                    return;
                }
            }
            other => {
                let detail = format!("Unknown message type: {}", other.unwrap_or(""));
                if !send_error(&mut socket, &detail).await {
                    return;
                }
            }
        }
    }
}

/// Persist an injected human message at the meeting's current round and
/// acknowledge it. Returns false when the socket is gone.
async fn handle_user_message(
    state: &AppState,
    meeting_id: &str,
    data: &Value,
    socket: &mut WebSocket,
) -> bool {
    let content = data.get("content").and_then(Value::as_str).unwrap_or("");
    if content.is_empty() {
        return send_error(socket, "Empty message").await;
    }

    let meeting = match state.store.get_meeting(meeting_id).await {
        Ok(Some(m)) => m,
        _ => return send_error(socket, "Meeting not found").await,
    };

    let message = MeetingMessage::from_user(meeting_id, content, meeting.current_round);
    if let Err(e) = state.store.insert_message(&message).await {
        log::error!("ws: could not save user message for meeting {meeting_id}: {e}");
        return send_error(socket, "Could not save message").await;
    }

    send_json(
        socket,
        json!({
            "type": "message_saved",
            "role": "user",
            "content": content,
        }),
    )
    .await
}

/// Start the requested rounds and stream events until the run ends. Returns
/// false when the socket is gone.
async fn handle_start_round(
    state: &AppState,
    meeting_id: &str,
    data: &Value,
    socket: &mut WebSocket,
) -> bool {
    let options = RunOptions {
        rounds: data.get("rounds").and_then(Value::as_u64).unwrap_or(1) as u32,
        topic: data
            .get("topic")
            .and_then(Value::as_str)
            .map(str::to_string),
        locale: data
            .get("locale")
            .and_then(Value::as_str)
            .map(str::to_string),
    };

    // Subscribe first so no event of the new run is missed.
    let mut subscription = state.bus.subscribe(meeting_id).await;
    match state.runner.start_background(meeting_id, options).await {
        Ok(true) => {}
        Ok(false) => {
            state.bus.unsubscribe(meeting_id, subscription.id()).await;
            return send_error(socket, "A run is already in flight for this meeting").await;
        }
        Err(e) => {
            state.bus.unsubscribe(meeting_id, subscription.id()).await;
            return send_error(socket, &e.to_string()).await;
        }
    }

    loop {
        match subscription.recv_timeout(FORWARD_POLL).await {
            Some(event) => {
                let payload = match serde_json::to_value(&event) {
                    Ok(v) => v,
                    Err(_) => continue,
                };
                if !send_json(socket, payload).await {
                    state.bus.unsubscribe(meeting_id, subscription.id()).await;
                    return false;
                }
                if matches!(
                    event,
                    MeetingEvent::MeetingComplete { .. } | MeetingEvent::Error { .. }
                ) {
                    break;
                }
            }
            None => {
                // Cancellation produces no terminal event; stop forwarding
                // once the worker is gone and the queue is drained.
                if !state.runner.is_running(meeting_id) {
                    break;
                }
            }
        }
    }

    state.bus.unsubscribe(meeting_id, subscription.id()).await;
    true
}
