use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use vigil_core::config::ESCALATION_SECS;
use vigil_core::{AlertId, Severity, VenueId};
use vigil_venues::VenueStore;

use crate::classify::classify;
use crate::error::Result;
use crate::recipes::recipe_for;
use crate::store::AlertStore;
use crate::types::{Alert, AlertState};

/// Narrow notification capability. The Telegram adapter implements this;
/// the pipeline never sees a bot.
#[async_trait]
pub trait AlertNotifier: Send + Sync {
    /// Deliver to the venue's TD chats, honouring any per-venue bot credential.
    async fn notify_venue(&self, venue_id: &VenueId, text: &str);

    /// Deliver to the admin chat.
    async fn notify_admin(&self, text: &str);
}

/// Narrow command capability used for auto-recovery attempts.
#[async_trait]
pub trait RecoveryDispatcher: Send + Sync {
    async fn dispatch(
        &self,
        venue_id: &VenueId,
        command: &str,
        params: Value,
    ) -> std::result::Result<Value, String>;
}

/// Service-window membership, answered by the schedule engine.
pub trait WindowOracle: Send + Sync {
    fn is_in_window(&self, venue_id: &VenueId) -> bool;
}

/// The alert pipeline: classify → gate → auto-recover → notify → escalate.
///
/// All locks are released before any notification goes out; the only
/// long-lived state is the escalation timer table.
pub struct AlertPipeline {
    store: Arc<AlertStore>,
    venues: Arc<VenueStore>,
    notifier: Arc<dyn AlertNotifier>,
    recovery: Arc<dyn RecoveryDispatcher>,
    windows: Arc<dyn WindowOracle>,
    /// Armed escalation timers for active critical alerts. Shared with the
    /// timer tasks so a fired timer can retire itself.
    escalations: Arc<DashMap<AlertId, CancellationToken>>,
    escalation_delay: Duration,
}

impl AlertPipeline {
    pub fn new(
        store: Arc<AlertStore>,
        venues: Arc<VenueStore>,
        notifier: Arc<dyn AlertNotifier>,
        recovery: Arc<dyn RecoveryDispatcher>,
        windows: Arc<dyn WindowOracle>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            venues,
            notifier,
            recovery,
            windows,
            escalations: Arc::new(DashMap::new()),
            escalation_delay: Duration::from_secs(ESCALATION_SECS),
        })
    }

    /// Shortened escalation window for tests.
    pub fn with_escalation_delay(self: Arc<Self>, delay: Duration) -> Arc<Self> {
        let mut inner = Arc::try_unwrap(self).unwrap_or_else(|_| unreachable!());
        inner.escalation_delay = delay;
        Arc::new(inner)
    }

    /// Process one inbound alert from an agent (or an internal source such
    /// as a window-close event). Returns the persisted record.
    pub async fn handle(
        &self,
        venue_id: &VenueId,
        alert_type: Option<&str>,
        reported_severity: Severity,
        message: &str,
        context: Value,
    ) -> Result<Alert> {
        // Classification: the fixed table rules whenever a type token is
        // present; only untyped free-text alerts keep the reported severity.
        let kind = match alert_type {
            Some(t) => classify(t),
            None => reported_severity,
        };
        let alert_type = alert_type.unwrap_or("manual").to_string();

        let mut alert = Alert {
            id: AlertId::new(),
            venue_id: venue_id.clone(),
            kind,
            alert_type: alert_type.clone(),
            message: message.to_string(),
            context,
            state: AlertState::Classified,
            auto_resolved: false,
            escalated: false,
            resolved: false,
            acknowledged_at: None,
            acknowledged_by: None,
            created_at: Utc::now().to_rfc3339(),
        };

        // Gating: outside the service window, everything below emergency is
        // persisted quietly.
        if kind < Severity::Emergency && !self.windows.is_in_window(venue_id) {
            alert.state = AlertState::LoggedOnly;
            self.store.insert(&alert)?;
            info!(venue_id = %venue_id, %alert_type, "alert logged outside service window");
            return Ok(alert);
        }

        // Auto-recovery before anyone is paged.
        let mut fix_note = None;
        if let Some(fix) = recipe_for(&alert_type).and_then(|r| r.auto_fix) {
            let (command, params) = fix.command();
            match self.recovery.dispatch(venue_id, command, params).await {
                Ok(_) => {
                    alert.auto_resolved = true;
                    fix_note = Some("Auto-recovery: bitrate reduced 20% — succeeded".to_string());
                }
                Err(e) => {
                    fix_note = Some(format!("Auto-recovery attempted but failed: {e}"));
                }
            }
        }

        alert.state = AlertState::Active;
        self.store.insert(&alert)?;

        let text = self.compose(&alert, fix_note.as_deref());
        self.notifier.notify_venue(venue_id, &text).await;
        if kind == Severity::Emergency {
            self.notifier.notify_admin(&text).await;
        }

        if kind == Severity::Critical {
            self.arm_escalation(&alert);
        }

        Ok(alert)
    }

    /// Acknowledge by full id. Cancels any armed escalation.
    pub fn acknowledge(&self, id: &AlertId, responder: &str) -> Result<Alert> {
        if let Some((_, token)) = self.escalations.remove(id) {
            token.cancel();
        }
        self.store.acknowledge(id, responder)
    }

    /// Acknowledge via a chat token's 8-char short form.
    pub fn acknowledge_short(&self, short: &str, responder: &str) -> Result<Option<Alert>> {
        match self.store.get_by_short(short)? {
            Some(alert) => Ok(Some(self.acknowledge(&alert.id, responder)?)),
            None => Ok(None),
        }
    }

    /// Whether an escalation timer is currently armed (test/introspection).
    pub fn escalation_armed(&self, id: &AlertId) -> bool {
        self.escalations.contains_key(id)
    }

    fn arm_escalation(&self, alert: &Alert) {
        let token = CancellationToken::new();
        self.escalations.insert(alert.id.clone(), token.clone());

        let escalations = Arc::clone(&self.escalations);
        let store = Arc::clone(&self.store);
        let venues = Arc::clone(&self.venues);
        let notifier = Arc::clone(&self.notifier);
        let alert = alert.clone();
        let delay = self.escalation_delay;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    escalations.remove(&alert.id);
                    if let Err(e) = store.mark_escalated(&alert.id) {
                        warn!(alert_id = %alert.id, "escalation update failed: {e}");
                        return;
                    }
                    let venue_name = venue_name(&venues, &alert.venue_id);
                    let text = format!(
                        "🚨 ESCALATION — no TD response at {venue_name}\n{}\nOriginal: {}\nAck: {}",
                        alert.alert_type, alert.message, alert.ack_token()
                    );
                    notifier.notify_admin(&text).await;
                    info!(alert_id = %alert.id, "critical alert escalated to admin");
                }
            }
        });
    }

    fn compose(&self, alert: &Alert, fix_note: Option<&str>) -> String {
        let venue_name = venue_name(&self.venues, &alert.venue_id);
        let time = Utc::now().format("%H:%M UTC");
        let mut lines = vec![
            format!("{} {} — {}", alert.kind.icon(), venue_name, alert.alert_type),
            alert.message.clone(),
            format!("Time: {time}"),
        ];
        if let Some(recipe) = recipe_for(&alert.alert_type) {
            lines.push(format!("Likely cause: {}", recipe.likely_cause));
            for (i, step) in recipe.steps.iter().enumerate() {
                lines.push(format!("{}. {step}", i + 1));
            }
        }
        if let Some(note) = fix_note {
            lines.push(note.to_string());
        }
        lines.push(format!("Ack: {}", alert.ack_token()));
        lines.join("\n")
    }

}

fn venue_name(venues: &VenueStore, venue_id: &VenueId) -> String {
    venues
        .get(venue_id)
        .ok()
        .flatten()
        .map(|v| v.name)
        .unwrap_or_else(|| venue_id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockNotifier {
        venue_msgs: Mutex<Vec<String>>,
        admin_msgs: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AlertNotifier for MockNotifier {
        async fn notify_venue(&self, _venue_id: &VenueId, text: &str) {
            self.venue_msgs.lock().unwrap().push(text.to_string());
        }
        async fn notify_admin(&self, text: &str) {
            self.admin_msgs.lock().unwrap().push(text.to_string());
        }
    }

    #[derive(Default)]
    struct MockRecovery {
        calls: Mutex<Vec<(String, Value)>>,
        fail: bool,
    }

    #[async_trait]
    impl RecoveryDispatcher for MockRecovery {
        async fn dispatch(
            &self,
            _venue_id: &VenueId,
            command: &str,
            params: Value,
        ) -> std::result::Result<Value, String> {
            self.calls.lock().unwrap().push((command.to_string(), params));
            if self.fail {
                Err("agent offline".to_string())
            } else {
                Ok(Value::Null)
            }
        }
    }

    struct FixedWindow(bool);

    impl WindowOracle for FixedWindow {
        fn is_in_window(&self, _venue_id: &VenueId) -> bool {
            self.0
        }
    }

    struct Fixture {
        pipeline: Arc<AlertPipeline>,
        notifier: Arc<MockNotifier>,
        recovery: Arc<MockRecovery>,
        venue_id: VenueId,
    }

    fn fixture(in_window: bool, recovery_fails: bool) -> Fixture {
        let venues = Arc::new(
            VenueStore::new(rusqlite::Connection::open_in_memory().unwrap(), "s").unwrap(),
        );
        let venue = venues.register("Grace Chapel", None).unwrap();
        let store =
            Arc::new(AlertStore::new(rusqlite::Connection::open_in_memory().unwrap()).unwrap());
        let notifier = Arc::new(MockNotifier::default());
        let recovery = Arc::new(MockRecovery {
            fail: recovery_fails,
            ..Default::default()
        });
        let pipeline = AlertPipeline::new(
            store,
            venues,
            Arc::clone(&notifier) as Arc<dyn AlertNotifier>,
            Arc::clone(&recovery) as Arc<dyn RecoveryDispatcher>,
            Arc::new(FixedWindow(in_window)),
        )
        .with_escalation_delay(Duration::from_millis(50));
        Fixture {
            pipeline,
            notifier,
            recovery,
            venue_id: venue.id,
        }
    }

    #[tokio::test]
    async fn critical_alert_notifies_with_ack_token_and_recipe() {
        let f = fixture(true, false);
        let alert = f
            .pipeline
            .handle(&f.venue_id, Some("stream_stopped"), Severity::Critical, "Stream dropped", Value::Null)
            .await
            .unwrap();
        assert_eq!(alert.kind, Severity::Critical);
        assert_eq!(alert.state, AlertState::Active);

        let msgs = f.notifier.venue_msgs.lock().unwrap();
        assert_eq!(msgs.len(), 1);
        assert!(msgs[0].contains("Grace Chapel"));
        assert!(msgs[0].contains("Likely cause"));
        assert!(msgs[0].contains(&alert.ack_token()));
        // Not an emergency — admin stays quiet for now.
        assert!(f.notifier.admin_msgs.lock().unwrap().is_empty());
        assert!(f.pipeline.escalation_armed(&alert.id));
    }

    #[tokio::test]
    async fn classification_table_overrides_reported_severity() {
        let f = fixture(true, false);
        // Agent says emergency, table says info.
        let alert = f
            .pipeline
            .handle(&f.venue_id, Some("stream_started"), Severity::Emergency, "live", Value::Null)
            .await
            .unwrap();
        assert_eq!(alert.kind, Severity::Info);
    }

    #[tokio::test]
    async fn untyped_alert_keeps_reported_severity() {
        let f = fixture(true, false);
        let alert = f
            .pipeline
            .handle(&f.venue_id, None, Severity::Critical, "operator text", Value::Null)
            .await
            .unwrap();
        assert_eq!(alert.kind, Severity::Critical);
        assert_eq!(alert.alert_type, "manual");
    }

    #[tokio::test]
    async fn out_of_window_non_emergency_is_logged_only() {
        let f = fixture(false, false);
        let alert = f
            .pipeline
            .handle(&f.venue_id, Some("stream_stopped"), Severity::Critical, "x", Value::Null)
            .await
            .unwrap();
        assert_eq!(alert.state, AlertState::LoggedOnly);
        assert!(f.notifier.venue_msgs.lock().unwrap().is_empty());
        assert!(!f.pipeline.escalation_armed(&alert.id));
    }

    #[tokio::test]
    async fn emergency_bypasses_gating_and_copies_admin() {
        let f = fixture(false, false);
        let alert = f
            .pipeline
            .handle(&f.venue_id, Some("multiple_systems_down"), Severity::Emergency, "x", Value::Null)
            .await
            .unwrap();
        assert_eq!(alert.state, AlertState::Active);
        assert_eq!(f.notifier.venue_msgs.lock().unwrap().len(), 1);
        assert_eq!(f.notifier.admin_msgs.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn auto_recovery_runs_before_notification() {
        let f = fixture(true, false);
        let alert = f
            .pipeline
            .handle(&f.venue_id, Some("bitrate_low"), Severity::Warning, "bitrate 800", Value::Null)
            .await
            .unwrap();
        assert!(alert.auto_resolved);
        let calls = f.recovery.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "streamer.reduceBitrate");
        assert_eq!(calls[0].1["percent"], 20);
        let msgs = f.notifier.venue_msgs.lock().unwrap();
        assert!(msgs[0].contains("Auto-recovery"));
    }

    #[tokio::test]
    async fn failed_auto_recovery_clears_flag_but_still_notifies() {
        let f = fixture(true, true);
        let alert = f
            .pipeline
            .handle(&f.venue_id, Some("fps_low"), Severity::Warning, "fps 18", Value::Null)
            .await
            .unwrap();
        assert!(!alert.auto_resolved);
        assert_eq!(f.notifier.venue_msgs.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unacknowledged_critical_escalates_once() {
        let f = fixture(true, false);
        let alert = f
            .pipeline
            .handle(&f.venue_id, Some("stream_stopped"), Severity::Critical, "x", Value::Null)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!f.pipeline.escalation_armed(&alert.id));
        let admin = f.notifier.admin_msgs.lock().unwrap();
        assert_eq!(admin.len(), 1);
        assert!(admin[0].contains("ESCALATION"));
        let stored = f.pipeline.store.get(&alert.id).unwrap().unwrap();
        assert!(stored.escalated);
    }

    #[tokio::test]
    async fn acknowledgement_cancels_escalation() {
        let f = fixture(true, false);
        let alert = f
            .pipeline
            .handle(&f.venue_id, Some("stream_stopped"), Severity::Critical, "x", Value::Null)
            .await
            .unwrap();
        let acked = f
            .pipeline
            .acknowledge_short(&alert.id.short(), "Dana")
            .unwrap()
            .unwrap();
        assert_eq!(acked.state, AlertState::Acknowledged);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(f.notifier.admin_msgs.lock().unwrap().is_empty());
        let stored = f.pipeline.store.get(&alert.id).unwrap().unwrap();
        assert!(!stored.escalated);
    }

    #[tokio::test]
    async fn unknown_short_token_is_none() {
        let f = fixture(true, false);
        assert!(f.pipeline.acknowledge_short("deadbeef", "x").unwrap().is_none());
    }
}
