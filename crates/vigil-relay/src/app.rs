use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;

use vigil_alerts::{AlertPipeline, AlertStore, RecoveryDispatcher, WindowOracle};
use vigil_core::config::RelayConfig;
use vigil_core::VenueId;
use vigil_parser::Parser;
use vigil_protocol::frames::{RelayEvent, VenueSummary};
use vigil_roster::{RosterStore, SwapBook};
use vigil_schedule::{CheckDispatcher, ScheduleEngine};
use vigil_telegram::TelegramAppContext;
use vigil_venues::VenueStore;

use crate::dispatch::DispatchCore;
use crate::ws::broadcast::EventBroadcaster;

/// Central shared state — one `Arc<AppState>` serves every Axum handler,
/// the WS legs, and the Telegram handler.
pub struct AppState {
    pub config: RelayConfig,
    pub venues: Arc<VenueStore>,
    pub alerts: Arc<AlertStore>,
    pub roster: Arc<RosterStore>,
    pub swaps: SwapBook,
    pub parser: Parser,
    pub pipeline: Arc<AlertPipeline>,
    pub schedule: Arc<ScheduleEngine>,
    pub core: Arc<DispatchCore>,
    pub broadcaster: EventBroadcaster,
    pub started_at: Instant,
    pub messages_relayed: AtomicU64,
    pub controllers: AtomicUsize,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: RelayConfig,
        venues: Arc<VenueStore>,
        alerts: Arc<AlertStore>,
        roster: Arc<RosterStore>,
        pipeline: Arc<AlertPipeline>,
        schedule: Arc<ScheduleEngine>,
        core: Arc<DispatchCore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            venues,
            alerts,
            roster,
            swaps: SwapBook::new(),
            parser: Parser::new(),
            pipeline,
            schedule,
            core,
            broadcaster: EventBroadcaster::new(),
            started_at: Instant::now(),
            messages_relayed: AtomicU64::new(0),
            controllers: AtomicUsize::new(0),
        })
    }

    /// Fan one event out to every admin WS connection and SSE subscriber.
    pub fn publish(&self, event: &RelayEvent) {
        if let Ok(json) = serde_json::to_string(event) {
            self.broadcaster.send(json);
        }
        self.messages_relayed.fetch_add(1, Ordering::Relaxed);
    }

    /// The `venue_list` snapshot: every registered venue with its live
    /// session state and last telemetry.
    pub fn venue_summaries(&self) -> Vec<VenueSummary> {
        let Ok(venues) = self.venues.list() else {
            return Vec::new();
        };
        venues
            .into_iter()
            .map(|venue| {
                let session = self.core.sessions.get(&venue.id);
                let (last_telemetry_at, status) = match &session {
                    Some(s) => (
                        s.last_telemetry_at
                            .lock()
                            .unwrap()
                            .map(|t| t.to_rfc3339()),
                        s.last_telemetry.lock().unwrap().clone(),
                    ),
                    None => (None, None),
                };
                VenueSummary {
                    venue_id: venue.id,
                    name: venue.name,
                    connected: session.is_some(),
                    last_telemetry_at,
                    status,
                }
            })
            .collect()
    }
}

#[async_trait]
impl TelegramAppContext for AppState {
    fn venues(&self) -> &VenueStore {
        &self.venues
    }

    fn roster(&self) -> &RosterStore {
        &self.roster
    }

    fn swaps(&self) -> &SwapBook {
        &self.swaps
    }

    fn parser(&self) -> &Parser {
        &self.parser
    }

    fn acknowledge_alert(&self, short: &str, responder: &str) -> Option<String> {
        match self.pipeline.acknowledge_short(short, responder) {
            Ok(Some(alert)) => Some(format!(
                "✅ Acknowledged {} for venue {} — thanks, {responder}.",
                alert.alert_type, alert.venue_id
            )),
            Ok(None) => None,
            Err(e) => Some(format!("Acknowledgement failed: {e}")),
        }
    }

    async fn dispatch_command(
        &self,
        venue_id: &VenueId,
        command: &str,
        params: Value,
    ) -> Result<Value, String> {
        self.core.send_and_wait(venue_id, command, params).await
    }
}

/// Narrow adapter handing the dispatch core to the alert pipeline's
/// auto-recovery and the pre-service scheduler — neither sees sessions.
pub struct CoreDispatchAdapter(pub Arc<DispatchCore>);

#[async_trait]
impl RecoveryDispatcher for CoreDispatchAdapter {
    async fn dispatch(
        &self,
        venue_id: &VenueId,
        command: &str,
        params: Value,
    ) -> Result<Value, String> {
        self.0.send_and_wait(venue_id, command, params).await
    }
}

#[async_trait]
impl CheckDispatcher for CoreDispatchAdapter {
    async fn dispatch(
        &self,
        venue_id: &VenueId,
        command: &str,
        params: Value,
    ) -> Result<Value, String> {
        self.0.send_and_wait(venue_id, command, params).await
    }
}

/// The schedule engine answering the alert pipeline's gating question.
pub struct EngineWindowOracle(pub Arc<ScheduleEngine>);

impl WindowOracle for EngineWindowOracle {
    fn is_in_window(&self, venue_id: &VenueId) -> bool {
        self.0.is_in_window(venue_id)
    }
}
