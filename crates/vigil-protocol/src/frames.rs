use serde::{Deserialize, Serialize};
use serde_json::Value;

use vigil_core::types::{Severity, VenueId};

use crate::telemetry::TelemetrySnapshot;

/// Agent → Relay message.
/// Wire: `{ "type": "status_update", "status": {...} }`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    StatusUpdate {
        status: TelemetrySnapshot,
    },
    Alert {
        message: String,
        severity: Severity,
        #[serde(rename = "alertType", skip_serializing_if = "Option::is_none")]
        alert_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<Value>,
    },
    CommandResult {
        id: String,
        command: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    PreviewFrame {
        timestamp: i64,
        width: u32,
        height: u32,
        format: String,
        /// Base64 image data, capped at 150 000 chars by the agent.
        data: String,
    },
    Ping,
}

/// Relay → Agent message.
/// Wire: `{ "type": "command", "id": "…", "command": "switcher.cut", "params": {...} }`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayMessage {
    Connected {
        #[serde(rename = "venueId")]
        venue_id: VenueId,
        name: String,
    },
    Command {
        id: String,
        command: String,
        #[serde(default)]
        params: Value,
    },
    Pong,
}

/// Raw inbound frame — read the `type` discriminator first, then try the
/// typed interpretation. Frames that don't match a known type keep their
/// full body for verbatim re-broadcast.
#[derive(Debug, Clone, Deserialize)]
pub struct RawFrame {
    #[serde(rename = "type")]
    pub frame_type: String,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, Value>,
}

impl RawFrame {
    /// Try to interpret this frame as a typed agent message.
    pub fn as_agent_message(&self) -> Option<AgentMessage> {
        let mut map = self.rest.clone();
        map.insert("type".to_string(), Value::String(self.frame_type.clone()));
        serde_json::from_value(Value::Object(map)).ok()
    }

    /// Reassemble the original JSON object (for unknown-type passthrough).
    pub fn into_value(self) -> Value {
        let mut map = self.rest;
        map.insert("type".to_string(), Value::String(self.frame_type));
        Value::Object(map)
    }
}

/// Relay fan-out event, published to admin WS connections, SSE subscribers,
/// and the Telegram adapter. Admin WS and SSE carry the identical payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayEvent {
    VenueConnected {
        #[serde(rename = "venueId")]
        venue_id: VenueId,
        name: String,
    },
    VenueDisconnected {
        #[serde(rename = "venueId")]
        venue_id: VenueId,
        reason: String,
    },
    StatusUpdate {
        #[serde(rename = "venueId")]
        venue_id: VenueId,
        status: TelemetrySnapshot,
    },
    Alert {
        #[serde(rename = "venueId")]
        venue_id: VenueId,
        message: String,
        severity: Severity,
        #[serde(rename = "alertType", skip_serializing_if = "Option::is_none")]
        alert_type: Option<String>,
    },
    CommandResult {
        #[serde(rename = "venueId")]
        venue_id: VenueId,
        id: String,
        command: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    PreviewFrame {
        #[serde(rename = "venueId")]
        venue_id: VenueId,
        timestamp: i64,
        width: u32,
        height: u32,
        format: String,
        data: String,
    },
    /// Snapshot sent to a controller connection right after accept.
    VenueList { venues: Vec<VenueSummary> },
    /// Unknown agent frame, forwarded verbatim with the venue attached.
    Raw {
        #[serde(rename = "venueId")]
        venue_id: VenueId,
        body: Value,
    },
}

/// One venue row in the `venue_list` snapshot and `GET /api/venues`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VenueSummary {
    pub venue_id: VenueId,
    pub name: String,
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_telemetry_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TelemetrySnapshot>,
}
