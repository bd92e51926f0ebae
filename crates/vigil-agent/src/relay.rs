//! Relay connection — the agent's one outward leg.
//!
//! Connects to `{relay}/church?token={bearer}`, sends a fresh
//! `status_update` the moment the socket opens, then pumps inbound commands
//! to the registry and outbound messages from the shared channel. On any
//! close or error the loop reconnects with exponential backoff (3 s → 60 s).

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use vigil_protocol::frames::{AgentMessage, RelayMessage};

use crate::registry::Registry;
use crate::runtime::AgentRuntime;
use vigil_drivers::Backoff;

/// Run the connection until shutdown. Never returns early on transport
/// errors — those only restart the backoff loop.
pub async fn run(
    rt: Arc<AgentRuntime>,
    registry: Arc<Registry>,
    mut outbound_rx: mpsc::Receiver<AgentMessage>,
    mut shutdown: watch::Receiver<bool>,
) {
    let Some(relay_base) = rt.config.relay.clone() else {
        error!("no relay URL configured");
        return;
    };
    let Some(token) = rt.config.token.clone() else {
        error!("no venue token configured");
        return;
    };
    let url = format!("{}/church?token={}", relay_base.trim_end_matches('/'), token);

    let mut backoff = Backoff::relay();
    loop {
        if *shutdown.borrow() {
            return;
        }
        match tokio_tungstenite::connect_async(&url).await {
            Ok((ws, _)) => {
                info!("connected to relay");
                backoff.reset();
                let disconnected =
                    session(&rt, &registry, ws, &mut outbound_rx, &mut shutdown).await;
                if !disconnected {
                    // Shutdown requested from inside the session.
                    return;
                }
                warn!("relay connection lost");
            }
            Err(e) => {
                warn!(error = %e, "relay connect failed");
            }
        }

        let delay = backoff.next_delay();
        debug!(delay_secs = delay.as_secs(), "relay reconnect scheduled");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

/// One connected session. Returns `true` when the transport dropped (caller
/// reconnects) and `false` on shutdown.
async fn session(
    rt: &Arc<AgentRuntime>,
    registry: &Arc<Registry>,
    ws: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    outbound_rx: &mut mpsc::Receiver<AgentMessage>,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    let (mut sink, mut stream) = ws.split();

    // The relay wants a full picture immediately after attach.
    let hello = AgentMessage::StatusUpdate {
        status: rt.snapshot(),
    };
    if send_frame(&mut sink, &hello).await.is_err() {
        return true;
    }

    loop {
        tokio::select! {
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        handle_inbound(rt, registry, &text).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sink.send(Message::Pong(data)).await.is_err() {
                            return true;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return true,
                    Some(Err(e)) => {
                        warn!(error = %e, "relay socket error");
                        return true;
                    }
                    _ => {}
                }
            }

            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(msg) => {
                        if send_frame(&mut sink, &msg).await.is_err() {
                            return true;
                        }
                    }
                    None => return false,
                }
            }

            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    let _ = sink.send(Message::Close(None)).await;
                    return false;
                }
            }
        }
    }
}

async fn handle_inbound(rt: &Arc<AgentRuntime>, registry: &Arc<Registry>, text: &str) {
    let msg: RelayMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            warn!(error = %e, "malformed relay frame");
            return;
        }
    };
    match msg {
        RelayMessage::Connected { venue_id, name } => {
            info!(%venue_id, %name, "relay accepted session");
        }
        RelayMessage::Pong => {}
        RelayMessage::Command { id, command, params } => {
            // Handlers may block on device I/O; a slow switcher must not
            // stall the read loop or the other devices' commands.
            let rt = Arc::clone(rt);
            let registry = Arc::clone(registry);
            tokio::spawn(async move {
                let result = registry.dispatch(&rt, &command, &params).await;
                let reply = match result {
                    Ok(reply) => AgentMessage::CommandResult {
                        id,
                        command,
                        result: Some(reply.into_value()),
                        error: None,
                    },
                    Err(e) => AgentMessage::CommandResult {
                        id,
                        command,
                        result: None,
                        error: Some(e.wire_message()),
                    },
                };
                let _ = rt.outbound.send(reply).await;
            });
        }
    }
}

async fn send_frame<S>(sink: &mut S, msg: &AgentMessage) -> Result<(), ()>
where
    S: futures_util::Sink<Message> + Unpin,
{
    let json = match serde_json::to_string(msg) {
        Ok(j) => j,
        Err(e) => {
            error!(error = %e, "outbound serialization failed");
            return Ok(());
        }
    };
    sink.send(Message::Text(json.into())).await.map_err(|_| ())
}
