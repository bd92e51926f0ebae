use async_trait::async_trait;
use serde_json::Value;

use vigil_core::VenueId;
use vigil_parser::Parser;
use vigil_roster::{RosterStore, SwapBook};
use vigil_venues::VenueStore;

/// Narrow capability surface the chat handler needs from the relay.
///
/// The handler never touches sessions, sockets, or the dispatch core
/// directly — commands go through `dispatch_command`, which applies the
/// same rate limiting and correlation as the admin HTTP surface.
#[async_trait]
pub trait TelegramAppContext: Send + Sync {
    fn venues(&self) -> &VenueStore;
    fn roster(&self) -> &RosterStore;
    fn swaps(&self) -> &SwapBook;
    fn parser(&self) -> &Parser;

    /// Acknowledge an alert by its 8-char short token. Returns a
    /// confirmation line, or `None` when no such alert exists.
    fn acknowledge_alert(&self, short: &str, responder: &str) -> Option<String>;

    /// Dispatch one command to a venue's agent and wait (≤10 s) for the
    /// correlated result.
    async fn dispatch_command(
        &self,
        venue_id: &VenueId,
        command: &str,
        params: Value,
    ) -> Result<Value, String>;
}
