use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{info, warn};

use vigil_core::VenueId;
use vigil_venues::VenueStore;

use crate::window::minutes_to_next_start;

const TICK: Duration = Duration::from_secs(5 * 60);
const LEAD_MIN: i64 = 25;
const LEAD_MAX: i64 = 35;
const CHECK_COOLDOWN: Duration = Duration::from_secs(2 * 60 * 60);

/// Narrow dispatch capability handed in by the relay: run one command on a
/// venue's agent and wait (≤10 s) for the correlated result.
#[async_trait]
pub trait CheckDispatcher: Send + Sync {
    async fn dispatch(
        &self,
        venue_id: &VenueId,
        command: &str,
        params: Value,
    ) -> std::result::Result<Value, String>;
}

/// Narrow notification capability: one text message to the venue's TD chats.
#[async_trait]
pub trait CheckNotifier: Send + Sync {
    async fn notify_tds(&self, venue_id: &VenueId, text: &str);
}

/// Pre-service check runner.
///
/// Every five minutes: for each venue whose next scheduled start is 25–35
/// minutes out and whose last check is older than two hours, dispatch
/// `system.preServiceCheck` and send the formatted result to the venue's
/// TDs as a single message.
pub struct PreServiceScheduler {
    venues: Arc<VenueStore>,
    dispatcher: Arc<dyn CheckDispatcher>,
    notifier: Arc<dyn CheckNotifier>,
    last_check: DashMap<VenueId, Instant>,
}

impl PreServiceScheduler {
    pub fn new(
        venues: Arc<VenueStore>,
        dispatcher: Arc<dyn CheckDispatcher>,
        notifier: Arc<dyn CheckNotifier>,
    ) -> Self {
        Self {
            venues,
            dispatcher,
            notifier,
            last_check: DashMap::new(),
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("pre-service scheduler started");
        let mut interval = tokio::time::interval(TICK);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => self.tick().await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    async fn tick(&self) {
        let venues = match self.venues.list() {
            Ok(v) => v,
            Err(e) => {
                warn!("pre-service tick: venue list failed: {e}");
                return;
            }
        };
        let now = Utc::now();

        for venue in venues {
            let Some(minutes) = minutes_to_next_start(&venue, now) else {
                continue;
            };
            if !(LEAD_MIN..=LEAD_MAX).contains(&minutes) {
                continue;
            }
            if let Some(at) = self.last_check.get(&venue.id) {
                if at.elapsed() < CHECK_COOLDOWN {
                    continue;
                }
            }
            self.last_check.insert(venue.id.clone(), Instant::now());

            info!(venue_id = %venue.id, minutes, "running pre-service check");
            let result = self
                .dispatcher
                .dispatch(&venue.id, "system.preServiceCheck", Value::Null)
                .await;
            let text = format_report(&venue.name, minutes, &result);
            self.notifier.notify_tds(&venue.id, &text).await;
        }
    }
}

/// Render the check result as one chat message. The check returns a map of
/// subsystem → `{ok, detail}`; anything else is shown raw.
fn format_report(
    venue_name: &str,
    minutes: i64,
    result: &std::result::Result<Value, String>,
) -> String {
    let mut lines = vec![format!(
        "🔍 Pre-service check — {venue_name} (service in {minutes} min)"
    )];
    match result {
        Ok(Value::Object(map)) => {
            for (subsystem, entry) in map {
                let ok = entry["ok"].as_bool().unwrap_or(false);
                let icon = if ok { "✅" } else { "❌" };
                match entry["detail"].as_str() {
                    Some(detail) => lines.push(format!("{icon} {subsystem}: {detail}")),
                    None => lines.push(format!("{icon} {subsystem}")),
                }
            }
        }
        Ok(other) => lines.push(other.to_string()),
        Err(e) => lines.push(format!("⚠️ Check could not run: {e}")),
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn report_lists_subsystems_with_icons() {
        let result = Ok(json!({
            "streamer": { "ok": true, "detail": "connected, 0 dropped frames" },
            "switcher": { "ok": false, "detail": "not reachable" },
        }));
        let text = format_report("Grace Chapel", 30, &result);
        assert!(text.contains("Grace Chapel"));
        assert!(text.contains("service in 30 min"));
        assert!(text.contains("✅ streamer: connected, 0 dropped frames"));
        assert!(text.contains("❌ switcher: not reachable"));
        // Single message, newline separated.
        assert_eq!(text.lines().count(), 3);
    }

    #[test]
    fn report_surfaces_dispatch_failure() {
        let result = Err("timeout".to_string());
        let text = format_report("Grace Chapel", 28, &result);
        assert!(text.contains("Check could not run: timeout"));
    }
}
