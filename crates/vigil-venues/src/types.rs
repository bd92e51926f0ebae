use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use vigil_core::VenueId;

/// Whether a venue runs on a weekly recurring schedule or is a one-off
/// event with an expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleType {
    #[default]
    Recurring,
    Event,
}

impl std::fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduleType::Recurring => write!(f, "recurring"),
            ScheduleType::Event => write!(f, "event"),
        }
    }
}

impl std::str::FromStr for ScheduleType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "recurring" => Ok(ScheduleType::Recurring),
            "event" => Ok(ScheduleType::Event),
            other => Err(format!("unknown schedule type: {other}")),
        }
    }
}

/// One recurring service slot. `day_of_week` is 0=Sunday … 6=Saturday,
/// matching how venue staff fill in the portal form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceTime {
    pub day_of_week: u8,
    pub start_hour: u8,
    pub start_min: u8,
    pub duration_hours: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// A window during which the venue is deliberately dark — the schedule
/// engine reports "out of window" for its whole duration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceWindow {
    pub id: String,
    pub venue_id: VenueId,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Persisted venue record. The bearer token is immutable after issue; a
/// fresh token means a fresh venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Venue {
    pub id: VenueId,
    pub name: String,
    pub email: Option<String>,
    pub token: String,
    /// 6-char uppercase hex code TDs use with `/register`.
    pub registration_code: String,
    pub registered_at: String,
    pub service_times: Vec<ServiceTime>,
    pub schedule_type: ScheduleType,
    /// Event venues only: the venue auto-mutes after this instant.
    pub expires_at: Option<DateTime<Utc>>,
    /// Per-venue alert bot credential; the relay default is used when unset.
    pub bot_token: Option<String>,
}
