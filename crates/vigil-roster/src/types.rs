use serde::{Deserialize, Serialize};

use vigil_core::VenueId;

/// One registered TD. Keyed by `(venue_id, telegram_user_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterMember {
    pub venue_id: VenueId,
    pub telegram_user_id: String,
    pub name: String,
    pub telegram_chat_id: Option<i64>,
    pub phone: Option<String>,
    pub active: bool,
    pub registered_at: String,
}

/// One on-call rotation row. At most one row per venue carries the current
/// ISO week in `week_of_iso_week`; assignment clears all others.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnCallEntry {
    pub venue_id: VenueId,
    pub td_name: String,
    pub telegram_chat_id: Option<i64>,
    pub telegram_user_id: String,
    pub phone: Option<String>,
    /// `YYYY-Www`, or empty when the member holds no week.
    pub week_of_iso_week: String,
    pub is_primary: bool,
}

/// A claimable guest identity, 24 h lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestToken {
    /// `GUEST-` + 8 lowercase hex.
    pub token: String,
    pub venue_id: VenueId,
    pub display_name: String,
    pub created_at: String,
    pub expires_at: String,
    pub claimed_by_chat_id: Option<i64>,
}
