//! Dispatch & correlation core.
//!
//! Every command — admin HTTP, admin WS, Telegram, auto-recovery — enters
//! through [`DispatchCore`]: one token from the venue's bucket, then send
//! to the live session, queue for a briefly-offline one, or refuse.
//! Results correlate back by command id through registered oneshot waiters
//! with a 10-second deadline; shutdown drains every waiter with a
//! `shutdown` error so no caller hangs past the 5-second drain budget.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info};

use vigil_core::config::COMMAND_TIMEOUT_SECS;
use vigil_core::{CommandId, ErrorCode, VenueId};
use vigil_protocol::frames::RelayMessage;

use crate::limiter::RateLimiter;
use crate::queue::{OfflineQueue, QueuedCommand};
use crate::session::SessionMap;

/// Result of a correlated command, as delivered by the agent.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub result: Option<Value>,
    pub error: Option<String>,
}

/// Injection verdict for the non-waiting path (HTTP status mapping is the
/// caller's business).
#[derive(Debug, Clone, PartialEq)]
pub enum Inject {
    Sent { id: String },
    Queued { id: String },
    RateLimited,
    Offline,
}

pub struct DispatchCore {
    pub sessions: SessionMap,
    pub limiter: RateLimiter,
    pub offline: OfflineQueue,
    waiters: DashMap<(VenueId, String), oneshot::Sender<CommandOutcome>>,
}

impl DispatchCore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sessions: SessionMap::new(),
            limiter: RateLimiter::new(),
            offline: OfflineQueue::new(),
            waiters: DashMap::new(),
        })
    }

    /// Rate-limit, then send or queue. Fire-and-forget — pair with
    /// [`DispatchCore::wait`] for a correlated result.
    pub fn inject(&self, venue_id: &VenueId, command: &str, params: Value) -> Inject {
        if !self.limiter.try_consume(venue_id) {
            return Inject::RateLimited;
        }
        let id = CommandId::new().to_string();

        if let Some(session) = self.sessions.get(venue_id) {
            session.send_json(&RelayMessage::Command {
                id: id.clone(),
                command: command.to_string(),
                params,
            });
            return Inject::Sent { id };
        }

        if self.sessions.recently_disconnected(venue_id) {
            self.offline.enqueue(
                venue_id,
                QueuedCommand {
                    id: id.clone(),
                    command: command.to_string(),
                    params,
                    queued_at: std::time::Instant::now(),
                },
            );
            return Inject::Queued { id };
        }

        Inject::Offline
    }

    /// Register a waiter for `(venue, id)` and await the agent's
    /// `command_result`, bounded at 10 s.
    pub async fn wait(&self, venue_id: &VenueId, id: &str) -> CommandOutcome {
        let (tx, rx) = oneshot::channel();
        self.waiters.insert((venue_id.clone(), id.to_string()), tx);

        match tokio::time::timeout(Duration::from_secs(COMMAND_TIMEOUT_SECS), rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => CommandOutcome {
                result: None,
                error: Some("shutdown".to_string()),
            },
            Err(_) => {
                self.waiters.remove(&(venue_id.clone(), id.to_string()));
                CommandOutcome {
                    result: None,
                    error: Some(ErrorCode::Timeout.as_str().to_string()),
                }
            }
        }
    }

    /// Inject and wait in one step. Errors are the wire taxonomy strings.
    pub async fn send_and_wait(
        &self,
        venue_id: &VenueId,
        command: &str,
        params: Value,
    ) -> Result<Value, String> {
        match self.inject(venue_id, command, params) {
            Inject::Sent { id } => {
                let outcome = self.wait(venue_id, &id).await;
                match outcome.error {
                    Some(e) => Err(e),
                    None => Ok(outcome.result.unwrap_or(Value::Null)),
                }
            }
            Inject::Queued { .. } => Err(ErrorCode::ServiceUnavailable.as_str().to_string()),
            Inject::RateLimited => Err(ErrorCode::RateLimited.as_str().to_string()),
            Inject::Offline => Err(ErrorCode::ServiceUnavailable.as_str().to_string()),
        }
    }

    /// Resolve the waiter for an inbound `command_result`. Exactly-once:
    /// the entry is removed before sending, and a late result after a
    /// timeout finds no waiter.
    pub fn resolve(&self, venue_id: &VenueId, id: &str, outcome: CommandOutcome) {
        if let Some(((_, _), tx)) = self.waiters.remove(&(venue_id.clone(), id.to_string())) {
            let _ = tx.send(outcome);
        } else {
            debug!(venue_id = %venue_id, id, "command_result with no waiter (timed out or fire-and-forget)");
        }
    }

    /// Send `command` to every open session with a fresh id per venue.
    /// No waiting, no queuing.
    pub fn broadcast(&self, command: &str, params: &Value, total_venues: usize) -> (usize, usize) {
        let mut sent = 0;
        for venue_id in self.sessions.venue_ids() {
            if let Some(session) = self.sessions.get(&venue_id) {
                session.send_json(&RelayMessage::Command {
                    id: CommandId::new().to_string(),
                    command: command.to_string(),
                    params: params.clone(),
                });
                sent += 1;
            }
        }
        (sent, total_venues)
    }

    /// Drain every in-flight waiter with a `shutdown` error and cancel all
    /// sessions. Called once at process shutdown.
    pub fn drain_shutdown(&self) {
        let keys: Vec<(VenueId, String)> =
            self.waiters.iter().map(|e| e.key().clone()).collect();
        info!(waiters = keys.len(), "draining correlation waiters for shutdown");
        for key in keys {
            if let Some((_, tx)) = self.waiters.remove(&key) {
                let _ = tx.send(CommandOutcome {
                    result: None,
                    error: Some("shutdown".to_string()),
                });
            }
        }
        self.sessions.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn offline_venue_is_service_unavailable() {
        let core = DispatchCore::new();
        let venue = VenueId::from("v-1");
        assert_eq!(
            core.inject(&venue, "switcher.cut", json!({})),
            Inject::Offline
        );
    }

    #[tokio::test]
    async fn open_session_gets_the_frame() {
        let core = DispatchCore::new();
        let venue = VenueId::from("v-1");
        let (session, _) = core.sessions.attach(&venue, "Grace");
        let verdict = core.inject(&venue, "switcher.cut", json!({ "me": 0 }));
        let Inject::Sent { id } = verdict else {
            panic!("expected Sent, got {verdict:?}");
        };
        // The frame is waiting in the session's outbound queue.
        let frame = session.outbound.pop().await;
        assert!(frame.contains(r#""type":"command""#));
        assert!(frame.contains(&id));
        assert!(frame.contains("switcher.cut"));
    }

    #[test]
    fn recently_disconnected_venue_queues() {
        let core = DispatchCore::new();
        let venue = VenueId::from("v-1");
        let (session, _) = core.sessions.attach(&venue, "Grace");
        core.sessions.detach(&session);

        let verdict = core.inject(&venue, "switcher.cut", json!({}));
        assert!(matches!(verdict, Inject::Queued { .. }));
        assert_eq!(core.offline.len(&venue), 1);
    }

    #[test]
    fn rate_limit_beats_everything() {
        let core = DispatchCore::new();
        let venue = VenueId::from("v-1");
        core.sessions.attach(&venue, "Grace");
        let mut verdicts = Vec::new();
        for _ in 0..12 {
            verdicts.push(core.inject(&venue, "switcher.cut", json!({})));
        }
        let sent = verdicts.iter().filter(|v| matches!(v, Inject::Sent { .. })).count();
        let limited = verdicts.iter().filter(|v| matches!(v, Inject::RateLimited)).count();
        assert_eq!(sent, 10);
        assert_eq!(limited, 2);
    }

    #[tokio::test]
    async fn resolve_reaches_waiter_exactly_once() {
        let core = DispatchCore::new();
        let venue = VenueId::from("v-1");
        let core2 = Arc::clone(&core);
        let venue2 = venue.clone();
        let waiter = tokio::spawn(async move { core2.wait(&venue2, "cmd-1").await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        core.resolve(
            &venue,
            "cmd-1",
            CommandOutcome {
                result: Some(json!("Cut executed")),
                error: None,
            },
        );
        let outcome = waiter.await.unwrap();
        assert_eq!(outcome.result, Some(json!("Cut executed")));
        // A duplicate result finds no waiter and is dropped quietly.
        core.resolve(
            &venue,
            "cmd-1",
            CommandOutcome {
                result: Some(json!("again")),
                error: None,
            },
        );
        assert!(core.waiters.is_empty());
    }

    #[tokio::test]
    async fn shutdown_drains_waiters_with_shutdown_error() {
        let core = DispatchCore::new();
        let venue = VenueId::from("v-1");
        let core2 = Arc::clone(&core);
        let venue2 = venue.clone();
        let waiter = tokio::spawn(async move { core2.wait(&venue2, "cmd-9").await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        core.drain_shutdown();
        let outcome = waiter.await.unwrap();
        assert_eq!(outcome.error.as_deref(), Some("shutdown"));
    }

    #[test]
    fn broadcast_counts_open_sessions() {
        let core = DispatchCore::new();
        core.sessions.attach(&VenueId::from("v-1"), "A");
        core.sessions.attach(&VenueId::from("v-2"), "B");
        let (sent, total) = core.broadcast("system.ping", &json!({}), 5);
        assert_eq!(sent, 2);
        assert_eq!(total, 5);
    }
}
