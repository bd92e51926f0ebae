//! Agent session records — one live session per venue, enforced at attach.
//!
//! Each session owns a bounded outbound buffer with drop-oldest overflow
//! (the same policy as the offline queue) and a cancellation token the
//! socket tasks watch. Replacing a session cancels the old one with the
//! reason "replaced"; its socket task sends the close frame on the way out.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use vigil_core::config::{OFFLINE_QUEUE_TTL_SECS, SESSION_SEND_BUFFER};
use vigil_core::VenueId;
use vigil_protocol::telemetry::TelemetrySnapshot;

/// Bounded outbound text buffer. Overflow drops the oldest queued frame so
/// a slow consumer degrades to stale-frame loss, never unbounded memory.
pub struct SendQueue {
    frames: Mutex<VecDeque<String>>,
    notify: Notify,
}

impl SendQueue {
    fn new() -> Self {
        Self {
            frames: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    pub fn push(&self, frame: String) {
        {
            let mut frames = self.frames.lock().unwrap();
            if frames.len() >= SESSION_SEND_BUFFER {
                frames.pop_front();
                debug!("session send buffer full, oldest frame dropped");
            }
            frames.push_back(frame);
        }
        self.notify.notify_one();
    }

    /// Wait for the next frame. Cancel-safe: a lost wakeup is recovered on
    /// the next `push`.
    pub async fn pop(&self) -> String {
        loop {
            if let Some(frame) = self.frames.lock().unwrap().pop_front() {
                return frame;
            }
            self.notify.notified().await;
        }
    }
}

pub struct AgentSession {
    pub venue_id: VenueId,
    pub venue_name: String,
    pub outbound: SendQueue,
    /// Cancelled on replace or shutdown; the socket tasks exit on it.
    pub cancel: CancellationToken,
    /// Close reason the socket task should use when `cancel` fires.
    pub close_reason: Mutex<&'static str>,
    pub connected_at: DateTime<Utc>,
    pub last_telemetry: Mutex<Option<TelemetrySnapshot>>,
    pub last_telemetry_at: Mutex<Option<DateTime<Utc>>>,
}

impl AgentSession {
    fn new(venue_id: VenueId, venue_name: String) -> Arc<Self> {
        Arc::new(Self {
            venue_id,
            venue_name,
            outbound: SendQueue::new(),
            cancel: CancellationToken::new(),
            close_reason: Mutex::new("shutdown"),
            connected_at: Utc::now(),
            last_telemetry: Mutex::new(None),
            last_telemetry_at: Mutex::new(None),
        })
    }

    pub fn record_telemetry(&self, snapshot: TelemetrySnapshot) {
        *self.last_telemetry.lock().unwrap() = Some(snapshot);
        *self.last_telemetry_at.lock().unwrap() = Some(Utc::now());
    }

    /// Queue one serialized frame for this session's writer task.
    pub fn send_json<T: serde::Serialize>(&self, frame: &T) {
        if let Ok(json) = serde_json::to_string(frame) {
            self.outbound.push(json);
        }
    }
}

/// The live session table plus disconnect timestamps for the offline-queue
/// window.
#[derive(Default)]
pub struct SessionMap {
    sessions: DashMap<VenueId, Arc<AgentSession>>,
    disconnected_at: DashMap<VenueId, Instant>,
}

impl SessionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new session, atomically replacing any prior one. The prior
    /// session (if any) is returned already cancelled with reason
    /// "replaced".
    pub fn attach(&self, venue_id: &VenueId, venue_name: &str) -> (Arc<AgentSession>, Option<Arc<AgentSession>>) {
        let session = AgentSession::new(venue_id.clone(), venue_name.to_string());
        let prior = self.sessions.insert(venue_id.clone(), Arc::clone(&session));
        if let Some(prior) = &prior {
            info!(venue_id = %venue_id, "existing session replaced");
            *prior.close_reason.lock().unwrap() = "replaced";
            prior.cancel.cancel();
        }
        self.disconnected_at.remove(venue_id);
        (session, prior)
    }

    /// Detach, but only if `session` is still the current one — a replaced
    /// session's late detach must not tear down its replacement.
    pub fn detach(&self, session: &Arc<AgentSession>) -> bool {
        let removed = self
            .sessions
            .remove_if(&session.venue_id, |_, current| Arc::ptr_eq(current, session))
            .is_some();
        if removed {
            self.disconnected_at
                .insert(session.venue_id.clone(), Instant::now());
        }
        removed
    }

    pub fn get(&self, venue_id: &VenueId) -> Option<Arc<AgentSession>> {
        self.sessions.get(venue_id).map(|s| Arc::clone(&s))
    }

    /// Disconnected within the offline-queue window?
    pub fn recently_disconnected(&self, venue_id: &VenueId) -> bool {
        self.disconnected_at
            .get(venue_id)
            .map(|at| at.elapsed() < Duration::from_secs(OFFLINE_QUEUE_TTL_SECS as u64))
            .unwrap_or(false)
    }

    pub fn connected_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn venue_ids(&self) -> Vec<VenueId> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    /// Cancel every session (process shutdown).
    pub fn cancel_all(&self) {
        for entry in self.sessions.iter() {
            entry.value().cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_replaces_and_cancels_prior() {
        let map = SessionMap::new();
        let venue = VenueId::from("v-1");
        let (first, none) = map.attach(&venue, "Grace");
        assert!(none.is_none());
        assert!(!first.cancel.is_cancelled());

        let (second, prior) = map.attach(&venue, "Grace");
        let prior = prior.unwrap();
        assert!(Arc::ptr_eq(&prior, &first));
        assert!(prior.cancel.is_cancelled());
        assert_eq!(*prior.close_reason.lock().unwrap(), "replaced");
        // The invariant: exactly one live session.
        assert_eq!(map.connected_count(), 1);
        assert!(Arc::ptr_eq(&map.get(&venue).unwrap(), &second));
    }

    #[test]
    fn stale_detach_does_not_remove_replacement() {
        let map = SessionMap::new();
        let venue = VenueId::from("v-1");
        let (first, _) = map.attach(&venue, "Grace");
        let (_second, _) = map.attach(&venue, "Grace");

        // The replaced session's socket task finally exits and detaches.
        assert!(!map.detach(&first));
        assert_eq!(map.connected_count(), 1);
        // And it did not start the offline-queue window.
        assert!(!map.recently_disconnected(&venue));
    }

    #[test]
    fn detach_opens_offline_window() {
        let map = SessionMap::new();
        let venue = VenueId::from("v-1");
        let (session, _) = map.attach(&venue, "Grace");
        assert!(map.detach(&session));
        assert_eq!(map.connected_count(), 0);
        assert!(map.recently_disconnected(&venue));
        // Reattach clears the window marker.
        let (_again, _) = map.attach(&venue, "Grace");
        assert!(!map.recently_disconnected(&venue));
    }

    #[tokio::test]
    async fn send_queue_drops_oldest_at_capacity() {
        let queue = SendQueue::new();
        for i in 0..(SESSION_SEND_BUFFER + 5) {
            queue.push(format!("frame-{i}"));
        }
        // The first five were dropped.
        assert_eq!(queue.pop().await, "frame-5");
    }

    #[tokio::test]
    async fn send_queue_wakes_waiting_popper() {
        let queue = Arc::new(SendQueue::new());
        let q2 = Arc::clone(&queue);
        let popper = tokio::spawn(async move { q2.pop().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push("hello".to_string());
        assert_eq!(popper.await.unwrap(), "hello");
    }
}
