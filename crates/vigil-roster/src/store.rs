use std::sync::Mutex;

use chrono::{Duration, Utc};
use rand::Rng;
use rusqlite::Connection;
use tracing::info;

use vigil_core::config::GUEST_TOKEN_TTL_HOURS;
use vigil_core::types::iso_week_key;
use vigil_core::VenueId;

use crate::db::init_db;
use crate::error::{Result, RosterError};
use crate::types::{GuestToken, OnCallEntry, RosterMember};

/// Roster, rotation, and guest token persistence.
pub struct RosterStore {
    db: Mutex<Connection>,
}

impl RosterStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self { db: Mutex::new(conn) })
    }

    // --- roster ------------------------------------------------------------

    /// Register (or refresh) a TD for a venue. Also upserts the matching
    /// on-call row with no week and no primary flag — rotation is assigned
    /// separately.
    pub fn register_member(
        &self,
        venue_id: &VenueId,
        telegram_user_id: &str,
        name: &str,
        chat_id: Option<i64>,
        phone: Option<&str>,
    ) -> Result<RosterMember> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO roster
             (venue_id, telegram_user_id, name, telegram_chat_id, phone, active, registered_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)
             ON CONFLICT(venue_id, telegram_user_id) DO UPDATE SET
                name = excluded.name,
                telegram_chat_id = excluded.telegram_chat_id,
                phone = COALESCE(excluded.phone, roster.phone),
                active = 1",
            rusqlite::params![venue_id.as_str(), telegram_user_id, name, chat_id, phone, now],
        )?;
        db.execute(
            "INSERT INTO on_call
             (venue_id, td_name, telegram_chat_id, telegram_user_id, phone, week_of_iso_week, is_primary)
             VALUES (?1, ?2, ?3, ?4, ?5, '', 0)
             ON CONFLICT(venue_id, telegram_user_id) DO UPDATE SET
                td_name = excluded.td_name,
                telegram_chat_id = excluded.telegram_chat_id,
                phone = COALESCE(excluded.phone, on_call.phone)",
            rusqlite::params![venue_id.as_str(), name, chat_id, telegram_user_id, phone],
        )?;
        info!(venue_id = %venue_id, name, "TD registered");

        Ok(RosterMember {
            venue_id: venue_id.clone(),
            telegram_user_id: telegram_user_id.to_string(),
            name: name.to_string(),
            telegram_chat_id: chat_id,
            phone: phone.map(String::from),
            active: true,
            registered_at: now,
        })
    }

    pub fn members(&self, venue_id: &VenueId) -> Result<Vec<RosterMember>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT venue_id, telegram_user_id, name, telegram_chat_id, phone, active, registered_at
             FROM roster WHERE venue_id = ?1 AND active = 1 ORDER BY registered_at",
        )?;
        let rows = stmt.query_map(rusqlite::params![venue_id.as_str()], row_to_member)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// All active chat ids for a venue — the notification fan-out list.
    pub fn chat_ids(&self, venue_id: &VenueId) -> Result<Vec<i64>> {
        Ok(self
            .members(venue_id)?
            .into_iter()
            .filter_map(|m| m.telegram_chat_id)
            .collect())
    }

    /// Venues a Telegram user is registered for. A user registered at one
    /// venue is the common case; multi-venue TDs exist.
    pub fn venues_for_user(&self, telegram_user_id: &str) -> Result<Vec<VenueId>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT venue_id FROM roster WHERE telegram_user_id = ?1 AND active = 1
             ORDER BY registered_at",
        )?;
        let rows = stmt.query_map(rusqlite::params![telegram_user_id], |row| {
            row.get::<_, String>(0)
        })?;
        Ok(rows.filter_map(|r| r.ok()).map(VenueId::from).collect())
    }

    /// Fuzzy member lookup: exact prefix first, then substring, both
    /// case-insensitive.
    pub fn find_member(&self, venue_id: &VenueId, name: &str) -> Result<Option<RosterMember>> {
        let members = self.members(venue_id)?;
        let needle = name.to_lowercase();
        Ok(members
            .iter()
            .find(|m| m.name.to_lowercase().starts_with(&needle))
            .or_else(|| members.iter().find(|m| m.name.to_lowercase().contains(&needle)))
            .cloned())
    }

    // --- on-call rotation --------------------------------------------------

    /// The TD currently answering for a venue: the holder of the current
    /// ISO week, else the primary, else the oldest roster member.
    pub fn current_on_call(&self, venue_id: &VenueId) -> Result<Option<OnCallEntry>> {
        let week = iso_week_key(Utc::now());
        let db = self.db.lock().unwrap();

        if let Some(entry) = select_on_call(
            &db,
            "venue_id = ?1 AND week_of_iso_week = ?2",
            rusqlite::params![venue_id.as_str(), week],
        )? {
            return Ok(Some(entry));
        }
        if let Some(entry) = select_on_call(
            &db,
            "venue_id = ?1 AND is_primary = 1",
            rusqlite::params![venue_id.as_str()],
        )? {
            return Ok(Some(entry));
        }
        // Oldest registration as last resort.
        select_on_call(
            &db,
            "venue_id = ?1 AND telegram_user_id IN
                (SELECT telegram_user_id FROM roster
                 WHERE venue_id = ?1 AND active = 1
                 ORDER BY registered_at LIMIT 1)",
            rusqlite::params![venue_id.as_str()],
        )
    }

    /// Hand the current ISO week to `name` (fuzzy match). Clears the week
    /// from every other entry for the venue first, so the "one holder per
    /// week" invariant cannot be violated even transiently.
    pub fn set_on_call(&self, venue_id: &VenueId, name: &str) -> Result<OnCallEntry> {
        let member = self
            .find_member(venue_id, name)?
            .ok_or_else(|| RosterError::NoSuchMember {
                name: name.to_string(),
            })?;
        self.assign_week(venue_id, &member.telegram_user_id)
    }

    /// Assign the current week to a specific user id (used by swap confirm).
    pub fn assign_week(&self, venue_id: &VenueId, telegram_user_id: &str) -> Result<OnCallEntry> {
        let week = iso_week_key(Utc::now());
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE on_call SET week_of_iso_week = ''
             WHERE venue_id = ?1 AND week_of_iso_week = ?2",
            rusqlite::params![venue_id.as_str(), week],
        )?;
        let n = db.execute(
            "UPDATE on_call SET week_of_iso_week = ?1
             WHERE venue_id = ?2 AND telegram_user_id = ?3",
            rusqlite::params![week, venue_id.as_str(), telegram_user_id],
        )?;
        if n == 0 {
            return Err(RosterError::NoSuchMember {
                name: telegram_user_id.to_string(),
            });
        }
        info!(venue_id = %venue_id, telegram_user_id, %week, "on-call assigned");
        select_on_call(
            &db,
            "venue_id = ?1 AND telegram_user_id = ?2",
            rusqlite::params![venue_id.as_str(), telegram_user_id],
        )?
        .ok_or_else(|| RosterError::NoSuchMember {
            name: telegram_user_id.to_string(),
        })
    }

    pub fn set_primary(&self, venue_id: &VenueId, telegram_user_id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE on_call SET is_primary = 0 WHERE venue_id = ?1",
            rusqlite::params![venue_id.as_str()],
        )?;
        let n = db.execute(
            "UPDATE on_call SET is_primary = 1
             WHERE venue_id = ?1 AND telegram_user_id = ?2",
            rusqlite::params![venue_id.as_str(), telegram_user_id],
        )?;
        if n == 0 {
            return Err(RosterError::NoSuchMember {
                name: telegram_user_id.to_string(),
            });
        }
        Ok(())
    }

    // --- guest tokens ------------------------------------------------------

    /// Issue a fresh guest token for a venue, valid 24 h.
    pub fn issue_guest(&self, venue_id: &VenueId, display_name: &str) -> Result<GuestToken> {
        let mut rng = rand::rng();
        let raw: [u8; 4] = rng.random();
        let token = format!("GUEST-{}", hex::encode(raw));
        let now = Utc::now();
        let expires = now + Duration::hours(GUEST_TOKEN_TTL_HOURS);

        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO guest_tokens
             (token, venue_id, display_name, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                token,
                venue_id.as_str(),
                display_name,
                now.to_rfc3339(),
                expires.to_rfc3339()
            ],
        )?;
        Ok(GuestToken {
            token,
            venue_id: venue_id.clone(),
            display_name: display_name.to_string(),
            created_at: now.to_rfc3339(),
            expires_at: expires.to_rfc3339(),
            claimed_by_chat_id: None,
        })
    }

    /// Claim a guest token. First claim wins; an expired or unknown token
    /// is invalid, a second claim is a conflict.
    pub fn claim_guest(&self, token: &str, chat_id: i64) -> Result<GuestToken> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let existing = match db.query_row(
            "SELECT token, venue_id, display_name, created_at, expires_at, claimed_by_chat_id
             FROM guest_tokens WHERE token = ?1 AND expires_at >= ?2",
            rusqlite::params![token, now],
            row_to_guest,
        ) {
            Ok(g) => g,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                return Err(RosterError::GuestTokenInvalid)
            }
            Err(e) => return Err(RosterError::Database(e)),
        };
        if existing.claimed_by_chat_id.is_some() {
            return Err(RosterError::GuestTokenClaimed);
        }
        db.execute(
            "UPDATE guest_tokens SET claimed_by_chat_id = ?1
             WHERE token = ?2 AND claimed_by_chat_id IS NULL",
            rusqlite::params![chat_id, token],
        )?;
        info!(token, chat_id, "guest token claimed");
        Ok(GuestToken {
            claimed_by_chat_id: Some(chat_id),
            ..existing
        })
    }

    /// The claimed, unexpired guest identity for a chat, if any.
    pub fn guest_for_chat(&self, chat_id: i64) -> Result<Option<GuestToken>> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT token, venue_id, display_name, created_at, expires_at, claimed_by_chat_id
             FROM guest_tokens WHERE claimed_by_chat_id = ?1 AND expires_at >= ?2
             ORDER BY created_at DESC LIMIT 1",
            rusqlite::params![chat_id, now],
            row_to_guest,
        ) {
            Ok(g) => Ok(Some(g)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(RosterError::Database(e)),
        }
    }

    /// Daily sweep: drop rows past their expiry. Returns the count removed.
    pub fn sweep_expired_guests(&self) -> Result<usize> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "DELETE FROM guest_tokens WHERE expires_at < ?1",
            rusqlite::params![now],
        )?;
        if n > 0 {
            info!(count = n, "expired guest tokens swept");
        }
        Ok(n)
    }
}

fn row_to_member(row: &rusqlite::Row<'_>) -> rusqlite::Result<RosterMember> {
    Ok(RosterMember {
        venue_id: VenueId::from(row.get::<_, String>(0)?),
        telegram_user_id: row.get(1)?,
        name: row.get(2)?,
        telegram_chat_id: row.get(3)?,
        phone: row.get(4)?,
        active: row.get::<_, i64>(5)? != 0,
        registered_at: row.get(6)?,
    })
}

fn row_to_on_call(row: &rusqlite::Row<'_>) -> rusqlite::Result<OnCallEntry> {
    Ok(OnCallEntry {
        venue_id: VenueId::from(row.get::<_, String>(0)?),
        td_name: row.get(1)?,
        telegram_chat_id: row.get(2)?,
        telegram_user_id: row.get(3)?,
        phone: row.get(4)?,
        week_of_iso_week: row.get(5)?,
        is_primary: row.get::<_, i64>(6)? != 0,
    })
}

fn row_to_guest(row: &rusqlite::Row<'_>) -> rusqlite::Result<GuestToken> {
    Ok(GuestToken {
        token: row.get(0)?,
        venue_id: VenueId::from(row.get::<_, String>(1)?),
        display_name: row.get(2)?,
        created_at: row.get(3)?,
        expires_at: row.get(4)?,
        claimed_by_chat_id: row.get(5)?,
    })
}

fn select_on_call(
    db: &Connection,
    clause: &str,
    params: impl rusqlite::Params,
) -> Result<Option<OnCallEntry>> {
    match db.query_row(
        &format!(
            "SELECT venue_id, td_name, telegram_chat_id, telegram_user_id, phone,
                    week_of_iso_week, is_primary
             FROM on_call WHERE {clause} LIMIT 1"
        ),
        params,
        row_to_on_call,
    ) {
        Ok(e) => Ok(Some(e)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(RosterError::Database(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> RosterStore {
        RosterStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    fn venue() -> VenueId {
        VenueId::from("v-1")
    }

    #[test]
    fn register_upserts_roster_and_on_call() {
        let store = store();
        let v = venue();
        store
            .register_member(&v, "u-1", "Dana Whitfield", Some(100), None)
            .unwrap();
        // Re-registration refreshes, no duplicate.
        store
            .register_member(&v, "u-1", "Dana W.", Some(101), Some("+1555"))
            .unwrap();
        let members = store.members(&v).unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].name, "Dana W.");
        assert_eq!(members[0].telegram_chat_id, Some(101));
        assert_eq!(members[0].phone.as_deref(), Some("+1555"));
    }

    #[test]
    fn fuzzy_find_prefers_prefix_over_substring() {
        let store = store();
        let v = venue();
        store.register_member(&v, "u-1", "Jordan Banks", Some(1), None).unwrap();
        store.register_member(&v, "u-2", "Dan Jordan", Some(2), None).unwrap();
        // Prefix match beats substring even though "Dan Jordan" registered later.
        let m = store.find_member(&v, "jordan").unwrap().unwrap();
        assert_eq!(m.telegram_user_id, "u-1");
        // Pure substring still works when no prefix matches.
        let m = store.find_member(&v, "banks").unwrap().unwrap();
        assert_eq!(m.telegram_user_id, "u-1");
        assert!(store.find_member(&v, "casey").unwrap().is_none());
    }

    #[test]
    fn on_call_selection_falls_back_week_primary_oldest() {
        let store = store();
        let v = venue();
        store.register_member(&v, "u-1", "Oldest", Some(1), None).unwrap();
        store.register_member(&v, "u-2", "Primary", Some(2), None).unwrap();
        store.register_member(&v, "u-3", "Weekly", Some(3), None).unwrap();

        // No week, no primary → oldest roster member.
        let entry = store.current_on_call(&v).unwrap().unwrap();
        assert_eq!(entry.telegram_user_id, "u-1");

        store.set_primary(&v, "u-2").unwrap();
        let entry = store.current_on_call(&v).unwrap().unwrap();
        assert_eq!(entry.telegram_user_id, "u-2");

        store.set_on_call(&v, "Weekly").unwrap();
        let entry = store.current_on_call(&v).unwrap().unwrap();
        assert_eq!(entry.telegram_user_id, "u-3");
        assert_eq!(entry.week_of_iso_week, iso_week_key(Utc::now()));
    }

    #[test]
    fn week_assignment_clears_other_holders() {
        let store = store();
        let v = venue();
        store.register_member(&v, "u-1", "Ash", Some(1), None).unwrap();
        store.register_member(&v, "u-2", "Blake", Some(2), None).unwrap();
        store.set_on_call(&v, "Ash").unwrap();
        store.set_on_call(&v, "Blake").unwrap();

        let week = iso_week_key(Utc::now());
        let entry = store.current_on_call(&v).unwrap().unwrap();
        assert_eq!(entry.telegram_user_id, "u-2");
        assert_eq!(entry.week_of_iso_week, week);
        // Ash no longer holds the week.
        let db = store.db.lock().unwrap();
        let holders: i64 = db
            .query_row(
                "SELECT COUNT(*) FROM on_call WHERE venue_id = 'v-1' AND week_of_iso_week = ?1",
                rusqlite::params![week],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(holders, 1);
    }

    #[test]
    fn guest_token_shape_and_first_claim_wins() {
        let store = store();
        let v = venue();
        let guest = store.issue_guest(&v, "Visiting Tech").unwrap();
        assert!(guest.token.starts_with("GUEST-"));
        assert_eq!(guest.token.len(), "GUEST-".len() + 8);

        let claimed = store.claim_guest(&guest.token, 555).unwrap();
        assert_eq!(claimed.claimed_by_chat_id, Some(555));
        assert!(matches!(
            store.claim_guest(&guest.token, 777),
            Err(RosterError::GuestTokenClaimed)
        ));
        // The original claimant keeps the identity.
        let ident = store.guest_for_chat(555).unwrap().unwrap();
        assert_eq!(ident.venue_id, v);
    }

    #[test]
    fn unknown_guest_token_is_invalid() {
        let store = store();
        assert!(matches!(
            store.claim_guest("GUEST-deadbeef", 1),
            Err(RosterError::GuestTokenInvalid)
        ));
    }

    #[test]
    fn sweep_removes_only_expired() {
        let store = store();
        let v = venue();
        let fresh = store.issue_guest(&v, "Fresh").unwrap();
        // Force one token into the past.
        let stale = store.issue_guest(&v, "Stale").unwrap();
        {
            let db = store.db.lock().unwrap();
            db.execute(
                "UPDATE guest_tokens SET expires_at = '2000-01-01T00:00:00Z' WHERE token = ?1",
                rusqlite::params![stale.token],
            )
            .unwrap();
        }
        assert_eq!(store.sweep_expired_guests().unwrap(), 1);
        assert!(store.claim_guest(&fresh.token, 9).is_ok());
        assert!(matches!(
            store.claim_guest(&stale.token, 9),
            Err(RosterError::GuestTokenInvalid)
        ));
    }

    #[test]
    fn venues_for_user_spans_venues() {
        let store = store();
        store.register_member(&VenueId::from("v-1"), "u-1", "Ash", Some(1), None).unwrap();
        store.register_member(&VenueId::from("v-2"), "u-1", "Ash", Some(1), None).unwrap();
        let venues = store.venues_for_user("u-1").unwrap();
        assert_eq!(venues.len(), 2);
    }
}
