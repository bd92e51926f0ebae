//! Short-lived offline command queue.
//!
//! Commands for a venue whose agent dropped within the last 30 s are held
//! here: cap 10 per venue, FIFO with drop-oldest, entries expire at 30 s.
//! The queue is drained into the session the moment the agent reattaches.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;

use vigil_core::config::{OFFLINE_QUEUE_CAP, OFFLINE_QUEUE_TTL_SECS};
use vigil_core::VenueId;

#[derive(Debug, Clone)]
pub struct QueuedCommand {
    pub id: String,
    pub command: String,
    pub params: Value,
    pub queued_at: Instant,
}

#[derive(Default)]
pub struct OfflineQueue {
    queues: DashMap<VenueId, VecDeque<QueuedCommand>>,
}

impl OfflineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue for a briefly-offline venue. Oldest entry is dropped at cap.
    pub fn enqueue(&self, venue_id: &VenueId, entry: QueuedCommand) {
        let mut queue = self.queues.entry(venue_id.clone()).or_default();
        Self::prune(&mut queue);
        if queue.len() >= OFFLINE_QUEUE_CAP {
            if let Some(dropped) = queue.pop_front() {
                debug!(venue_id = %venue_id, command = %dropped.command, "offline queue full, oldest dropped");
            }
        }
        queue.push_back(entry);
    }

    /// Take every still-fresh entry for a venue (oldest first). Stale
    /// entries are discarded, not delivered.
    pub fn drain(&self, venue_id: &VenueId) -> Vec<QueuedCommand> {
        let Some((_, mut queue)) = self.queues.remove(venue_id) else {
            return Vec::new();
        };
        Self::prune(&mut queue);
        queue.into_iter().collect()
    }

    pub fn len(&self, venue_id: &VenueId) -> usize {
        self.queues
            .get_mut(venue_id)
            .map(|mut q| {
                Self::prune(&mut q);
                q.len()
            })
            .unwrap_or(0)
    }

    fn prune(queue: &mut VecDeque<QueuedCommand>) {
        let ttl = Duration::from_secs(OFFLINE_QUEUE_TTL_SECS as u64);
        while queue
            .front()
            .map(|e| e.queued_at.elapsed() >= ttl)
            .unwrap_or(false)
        {
            queue.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(id: &str) -> QueuedCommand {
        QueuedCommand {
            id: id.to_string(),
            command: "switcher.cut".to_string(),
            params: json!({}),
            queued_at: Instant::now(),
        }
    }

    #[test]
    fn fifo_order_preserved_on_drain() {
        let queue = OfflineQueue::new();
        let venue = VenueId::from("v-1");
        queue.enqueue(&venue, entry("a"));
        queue.enqueue(&venue, entry("b"));
        queue.enqueue(&venue, entry("c"));
        let drained = queue.drain(&venue);
        let ids: Vec<_> = drained.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        // Drain empties the queue.
        assert!(queue.drain(&venue).is_empty());
    }

    #[test]
    fn cap_drops_oldest() {
        let queue = OfflineQueue::new();
        let venue = VenueId::from("v-1");
        for i in 0..12 {
            queue.enqueue(&venue, entry(&format!("c{i}")));
        }
        assert_eq!(queue.len(&venue), OFFLINE_QUEUE_CAP);
        let drained = queue.drain(&venue);
        assert_eq!(drained.first().unwrap().id, "c2");
        assert_eq!(drained.last().unwrap().id, "c11");
    }

    #[test]
    fn stale_entries_never_deliver() {
        let queue = OfflineQueue::new();
        let venue = VenueId::from("v-1");
        let mut old = entry("stale");
        old.queued_at = Instant::now() - Duration::from_secs(31);
        queue.enqueue(&venue, old);
        queue.enqueue(&venue, entry("fresh"));
        let drained = queue.drain(&venue);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].id, "fresh");
    }

    #[test]
    fn venues_are_isolated() {
        let queue = OfflineQueue::new();
        queue.enqueue(&VenueId::from("v-1"), entry("a"));
        assert_eq!(queue.len(&VenueId::from("v-2")), 0);
    }
}
