//! The admin leg — `GET /controller?apikey=`.
//!
//! A controller gets the `venue_list` snapshot on accept, then every relay
//! broadcast. Inbound frames may inject commands:
//! `{"type":"command","venueId":"…","command":"…","params":{…}}` — the
//! injection verdict comes straight back as a `command_ack` frame; the
//! correlated `command_result` arrives later on the broadcast stream like
//! everyone else's.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tracing::{info, warn};

use vigil_core::VenueId;
use vigil_protocol::frames::RelayEvent;

use crate::app::AppState;
use crate::dispatch::Inject;

const POLICY_VIOLATION: u16 = 1008;

pub async fn controller_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<HashMap<String, String>>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let apikey = query.get("apikey").cloned();
    ws.on_upgrade(move |socket| handle_controller(socket, apikey, state))
}

async fn handle_controller(mut socket: WebSocket, apikey: Option<String>, state: Arc<AppState>) {
    if apikey.as_deref() != Some(state.config.api_key.as_str()) {
        warn!("controller auth failed");
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: POLICY_VIOLATION,
                reason: "bad api key".into(),
            })))
            .await;
        return;
    }

    state.controllers.fetch_add(1, Ordering::Relaxed);
    info!("controller attached");

    let snapshot = RelayEvent::VenueList {
        venues: state.venue_summaries(),
    };
    let snapshot_json = serde_json::to_string(&snapshot).unwrap_or_default();
    let (mut sink, mut stream) = socket.split();
    if sink.send(Message::Text(snapshot_json.into())).await.is_err() {
        state.controllers.fetch_sub(1, Ordering::Relaxed);
        return;
    }

    let mut events = state.broadcaster.subscribe();

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(payload) => {
                        if sink.send(Message::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    // Lagged: skip the lost backlog and continue live.
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "controller stream lagged");
                    }
                    Err(_) => break,
                }
            }

            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(ack) = handle_inbound(&state, &text) {
                            let ack_json = ack.to_string();
                            if sink.send(Message::Text(ack_json.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    state.controllers.fetch_sub(1, Ordering::Relaxed);
    info!("controller detached");
}

fn handle_inbound(state: &Arc<AppState>, text: &str) -> Option<Value> {
    let frame: Value = serde_json::from_str(text).ok()?;
    if frame["type"] != "command" {
        return None;
    }
    let venue_id = VenueId::from(frame["venueId"].as_str()?);
    let command = frame["command"].as_str()?;
    let params = frame.get("params").cloned().unwrap_or(Value::Null);

    let ack = match state.core.inject(&venue_id, command, params) {
        Inject::Sent { id } => json!({ "type": "command_ack", "sent": true, "id": id }),
        Inject::Queued { id } => {
            json!({ "type": "command_ack", "sent": false, "queued": true, "id": id })
        }
        Inject::RateLimited => {
            json!({ "type": "command_ack", "sent": false, "error": "rate_limited" })
        }
        Inject::Offline => {
            json!({ "type": "command_ack", "sent": false, "error": "service_unavailable" })
        }
    };
    Some(ack)
}
