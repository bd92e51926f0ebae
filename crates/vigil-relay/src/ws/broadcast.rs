use tokio::sync::broadcast;

const BROADCAST_CAPACITY: usize = 256;

/// Fan-out bus for peer-observable events. Admin WS connections and SSE
/// subscribers each hold a receiver; a lagging subscriber loses old events,
/// never blocks the sender.
pub struct EventBroadcaster {
    tx: broadcast::Sender<String>,
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBroadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Push a JSON event to all subscribers. Silently drops when none exist.
    pub fn send(&self, payload: String) {
        let _ = self.tx.send(payload);
    }
}
