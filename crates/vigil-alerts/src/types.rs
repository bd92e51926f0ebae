use serde::{Deserialize, Serialize};
use serde_json::Value;

use vigil_core::{AlertId, Severity, VenueId};

/// Pipeline position of an alert. `Acknowledged` and `LoggedOnly` are
/// terminal; `Escalated` becomes terminal once an admin acknowledges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertState {
    New,
    Classified,
    Notified,
    Active,
    Acknowledged,
    LoggedOnly,
    Escalated,
}

impl std::fmt::Display for AlertState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AlertState::New => "new",
            AlertState::Classified => "classified",
            AlertState::Notified => "notified",
            AlertState::Active => "active",
            AlertState::Acknowledged => "acknowledged",
            AlertState::LoggedOnly => "logged_only",
            AlertState::Escalated => "escalated",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for AlertState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "new" => Ok(AlertState::New),
            "classified" => Ok(AlertState::Classified),
            "notified" => Ok(AlertState::Notified),
            "active" => Ok(AlertState::Active),
            "acknowledged" => Ok(AlertState::Acknowledged),
            "logged_only" => Ok(AlertState::LoggedOnly),
            "escalated" => Ok(AlertState::Escalated),
            other => Err(format!("unknown alert state: {other}")),
        }
    }
}

/// Persisted alert record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: AlertId,
    pub venue_id: VenueId,
    pub kind: Severity,
    /// Stable token, e.g. `stream_stopped`. Free-text alerts carry `manual`.
    pub alert_type: String,
    pub message: String,
    pub context: Value,
    pub state: AlertState,
    pub auto_resolved: bool,
    pub escalated: bool,
    pub resolved: bool,
    pub acknowledged_at: Option<String>,
    pub acknowledged_by: Option<String>,
    pub created_at: String,
}

impl Alert {
    /// Chat acknowledgement token for this alert.
    pub fn ack_token(&self) -> String {
        format!("/ack_{}", self.id.short())
    }
}
