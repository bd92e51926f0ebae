//! The Agent leg — `GET /church?token={bearer}`.
//!
//! Token verification happens in-protocol right after the upgrade: any
//! failure closes with 1008 and a terse reason, never a payload an attacker
//! can learn from. A successful attach atomically replaces any prior
//! session for the venue (close reason "replaced"), drains the venue's
//! offline queue (fresh entries only), and greets the agent with
//! `{type:"connected"}`.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};

use vigil_core::token;
use vigil_protocol::frames::{AgentMessage, RawFrame, RelayEvent, RelayMessage};

use crate::app::AppState;
use crate::dispatch::CommandOutcome;
use crate::session::AgentSession;

const POLICY_VIOLATION: u16 = 1008;

pub async fn church_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<HashMap<String, String>>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let token = query.get("token").cloned();
    ws.on_upgrade(move |socket| handle_agent(socket, token, state))
}

async fn handle_agent(mut socket: WebSocket, token: Option<String>, state: Arc<AppState>) {
    // Verify before anything else touches the socket.
    let claims = match token
        .as_deref()
        .ok_or_else(|| "missing token".to_string())
        .and_then(|t| {
            token::verify(&state.config.token_secret, t).map_err(|_| "bad token".to_string())
        }) {
        Ok(claims) => claims,
        Err(reason) => {
            warn!(%reason, "agent auth failed");
            close_with(&mut socket, &reason).await;
            return;
        }
    };

    let venue = match state.venues.get(&claims.venue_id) {
        Ok(Some(venue)) => venue,
        _ => {
            warn!(venue_id = %claims.venue_id, "unknown venue on agent leg");
            close_with(&mut socket, "unknown venue").await;
            return;
        }
    };

    let (session, _replaced) = state.core.sessions.attach(&venue.id, &venue.name);
    info!(venue_id = %venue.id, name = %venue.name, "agent session attached");

    session.send_json(&RelayMessage::Connected {
        venue_id: venue.id.clone(),
        name: venue.name.clone(),
    });

    // Commands queued during the brief disconnect go out first thing.
    for queued in state.core.offline.drain(&venue.id) {
        session.send_json(&RelayMessage::Command {
            id: queued.id,
            command: queued.command,
            params: queued.params,
        });
    }

    state.publish(&RelayEvent::VenueConnected {
        venue_id: venue.id.clone(),
        name: venue.name.clone(),
    });

    let (mut sink, mut stream) = socket.split();

    // Writer: session outbound queue → socket, until cancelled.
    let writer_session = Arc::clone(&session);
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = writer_session.cancel.cancelled() => {
                    let reason = *writer_session.close_reason.lock().unwrap();
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code: 1000,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
                frame = writer_session.outbound.pop() => {
                    if sink.send(Message::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Reader: inbound agent messages, in arrival order.
    let reason = loop {
        tokio::select! {
            _ = session.cancel.cancelled() => break "replaced",
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(&state, &session, &text).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break "closed",
                    Some(Err(e)) => {
                        warn!(venue_id = %session.venue_id, error = %e, "agent socket error");
                        break "error";
                    }
                    _ => {}
                }
            }
        }
    };

    // Wake the writer (no-op if already cancelled) and let it flush the
    // close frame before the socket drops.
    session.cancel.cancel();
    let _ = tokio::time::timeout(std::time::Duration::from_secs(1), writer).await;

    let was_current = state.core.sessions.detach(&session);
    if was_current {
        info!(venue_id = %session.venue_id, reason, "agent session detached");
        state.publish(&RelayEvent::VenueDisconnected {
            venue_id: session.venue_id.clone(),
            reason: reason.to_string(),
        });
    }
}

async fn handle_frame(state: &Arc<AppState>, session: &Arc<AgentSession>, text: &str) {
    let raw: RawFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            warn!(venue_id = %session.venue_id, error = %e, "malformed agent frame");
            return;
        }
    };

    match raw.as_agent_message() {
        Some(AgentMessage::StatusUpdate { status }) => {
            session.record_telemetry(status.clone());
            state.publish(&RelayEvent::StatusUpdate {
                venue_id: session.venue_id.clone(),
                status,
            });
        }
        Some(AgentMessage::Alert {
            message,
            severity,
            alert_type,
            context,
        }) => {
            state.publish(&RelayEvent::Alert {
                venue_id: session.venue_id.clone(),
                message: message.clone(),
                severity,
                alert_type: alert_type.clone(),
            });
            // Notification and escalation must not block the read loop.
            let pipeline = Arc::clone(&state.pipeline);
            let venue_id = session.venue_id.clone();
            tokio::spawn(async move {
                let result = pipeline
                    .handle(
                        &venue_id,
                        alert_type.as_deref(),
                        severity,
                        &message,
                        context.unwrap_or(serde_json::Value::Null),
                    )
                    .await;
                if let Err(e) = result {
                    warn!(venue_id = %venue_id, "alert pipeline failed: {e}");
                }
            });
        }
        Some(AgentMessage::CommandResult {
            id,
            command,
            result,
            error,
        }) => {
            state.core.resolve(
                &session.venue_id,
                &id,
                CommandOutcome {
                    result: result.clone(),
                    error: error.clone(),
                },
            );
            state.publish(&RelayEvent::CommandResult {
                venue_id: session.venue_id.clone(),
                id,
                command,
                result,
                error,
            });
        }
        Some(AgentMessage::PreviewFrame {
            timestamp,
            width,
            height,
            format,
            data,
        }) => {
            state.publish(&RelayEvent::PreviewFrame {
                venue_id: session.venue_id.clone(),
                timestamp,
                width,
                height,
                format,
                data,
            });
        }
        Some(AgentMessage::Ping) => {
            session.send_json(&RelayMessage::Pong);
        }
        None => {
            // Unknown type: forward verbatim so newer agents keep working.
            state.publish(&RelayEvent::Raw {
                venue_id: session.venue_id.clone(),
                body: raw.into_value(),
            });
        }
    }
}

async fn close_with(socket: &mut WebSocket, reason: &str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: POLICY_VIOLATION,
            reason: reason.to_string().into(),
        })))
        .await;
}
