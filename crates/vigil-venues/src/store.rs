use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rand::Rng;
use rusqlite::Connection;
use tracing::info;
use uuid::Uuid;

use vigil_core::{token, VenueId};

use crate::db::init_db;
use crate::error::{Result, VenueError};
use crate::types::{MaintenanceWindow, ScheduleType, ServiceTime, Venue};

/// Thread-safe store for venue records.
///
/// Wraps a single SQLite connection in a `Mutex` — the relay is the only
/// writer and its mutation rate is human-scale (admin actions), so a pool
/// would be dead weight.
pub struct VenueStore {
    db: Mutex<Connection>,
    token_secret: String,
}

impl VenueStore {
    pub fn new(conn: Connection, token_secret: impl Into<String>) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
            token_secret: token_secret.into(),
        })
    }

    /// Register a new venue: random id, 6-hex registration code, signed
    /// bearer token, empty schedule. A duplicate name is a conflict and
    /// leaves the existing record untouched.
    pub fn register(&self, name: &str, email: Option<&str>) -> Result<Venue> {
        if self.get_by_name(name)?.is_some() {
            return Err(VenueError::DuplicateName {
                name: name.to_string(),
            });
        }

        let id = VenueId::new();
        let bearer = token::sign(&self.token_secret, &id, name)?;
        let code = registration_code();
        let now = Utc::now().to_rfc3339();

        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO venues
             (id, name, email, token, registration_code, registered_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![id.as_str(), name, email, bearer, code, now],
        )?;
        info!(venue_id = %id, %name, "venue registered");

        Ok(Venue {
            id,
            name: name.to_string(),
            email: email.map(String::from),
            token: bearer,
            registration_code: code,
            registered_at: now,
            service_times: Vec::new(),
            schedule_type: ScheduleType::Recurring,
            expires_at: None,
            bot_token: None,
        })
    }

    pub fn get(&self, id: &VenueId) -> Result<Option<Venue>> {
        let db = self.db.lock().unwrap();
        select_one(&db, "id = ?1", rusqlite::params![id.as_str()])
    }

    pub fn get_by_name(&self, name: &str) -> Result<Option<Venue>> {
        let db = self.db.lock().unwrap();
        select_one(&db, "name = ?1", rusqlite::params![name])
    }

    pub fn get_by_code(&self, code: &str) -> Result<Option<Venue>> {
        let db = self.db.lock().unwrap();
        select_one(
            &db,
            "registration_code = ?1",
            rusqlite::params![code.to_uppercase()],
        )
    }

    pub fn list(&self) -> Result<Vec<Venue>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!("{VENUE_SELECT} ORDER BY registered_at"))?;
        let rows = stmt.query_map([], row_to_venue)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Delete a venue and its maintenance windows. Returns `NotFound` when
    /// no row was deleted.
    pub fn delete(&self, id: &VenueId) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "DELETE FROM maintenance_windows WHERE venue_id = ?1",
            rusqlite::params![id.as_str()],
        )?;
        let n = db.execute(
            "DELETE FROM venues WHERE id = ?1",
            rusqlite::params![id.as_str()],
        )?;
        if n == 0 {
            return Err(VenueError::NotFound {
                id: id.to_string(),
            });
        }
        info!(venue_id = %id, "venue deleted");
        Ok(())
    }

    /// Replace the recurring schedule. Entries are validated before the
    /// write so a bad portal submission can't corrupt the row.
    pub fn set_schedule(&self, id: &VenueId, times: &[ServiceTime]) -> Result<()> {
        for t in times {
            if t.day_of_week > 6 || t.start_hour > 23 || t.start_min > 59 {
                return Err(VenueError::InvalidSchedule(format!(
                    "out-of-range entry: day {} {:02}:{:02}",
                    t.day_of_week, t.start_hour, t.start_min
                )));
            }
            if t.duration_hours <= 0.0 {
                return Err(VenueError::InvalidSchedule(
                    "durationHours must be positive".into(),
                ));
            }
        }
        let json = serde_json::to_string(times)
            .map_err(|e| VenueError::InvalidSchedule(e.to_string()))?;
        self.update_one(id, "service_times", &json)
    }

    /// Convert a venue to event type with a hard expiry.
    pub fn set_event_expiry(&self, id: &VenueId, expires_at: DateTime<Utc>) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE venues SET schedule_type = 'event', expires_at = ?1 WHERE id = ?2",
            rusqlite::params![expires_at.to_rfc3339(), id.as_str()],
        )?;
        if n == 0 {
            return Err(VenueError::NotFound { id: id.to_string() });
        }
        Ok(())
    }

    pub fn set_bot_token(&self, id: &VenueId, bot_token: Option<&str>) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE venues SET bot_token = ?1 WHERE id = ?2",
            rusqlite::params![bot_token, id.as_str()],
        )?;
        if n == 0 {
            return Err(VenueError::NotFound { id: id.to_string() });
        }
        Ok(())
    }

    /// Replace all maintenance windows for a venue.
    pub fn replace_maintenance(
        &self,
        id: &VenueId,
        windows: &[(DateTime<Utc>, DateTime<Utc>, Option<String>)],
    ) -> Result<Vec<MaintenanceWindow>> {
        let db = self.db.lock().unwrap();
        db.execute(
            "DELETE FROM maintenance_windows WHERE venue_id = ?1",
            rusqlite::params![id.as_str()],
        )?;
        let mut out = Vec::with_capacity(windows.len());
        for (starts_at, ends_at, reason) in windows {
            let window_id = Uuid::new_v4().to_string();
            db.execute(
                "INSERT INTO maintenance_windows (id, venue_id, starts_at, ends_at, reason)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    window_id,
                    id.as_str(),
                    starts_at.to_rfc3339(),
                    ends_at.to_rfc3339(),
                    reason
                ],
            )?;
            out.push(MaintenanceWindow {
                id: window_id,
                venue_id: id.clone(),
                starts_at: *starts_at,
                ends_at: *ends_at,
                reason: reason.clone(),
            });
        }
        Ok(out)
    }

    pub fn maintenance_for(&self, id: &VenueId) -> Result<Vec<MaintenanceWindow>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, venue_id, starts_at, ends_at, reason
             FROM maintenance_windows WHERE venue_id = ?1 ORDER BY starts_at",
        )?;
        let rows = stmt.query_map(rusqlite::params![id.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?;
        Ok(rows
            .filter_map(|r| r.ok())
            .filter_map(|(id, venue_id, starts, ends, reason)| {
                Some(MaintenanceWindow {
                    id,
                    venue_id: VenueId::from(venue_id),
                    starts_at: parse_ts(&starts)?,
                    ends_at: parse_ts(&ends)?,
                    reason,
                })
            })
            .collect())
    }

    fn update_one(&self, id: &VenueId, column: &str, value: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            &format!("UPDATE venues SET {column} = ?1 WHERE id = ?2"),
            rusqlite::params![value, id.as_str()],
        )?;
        if n == 0 {
            return Err(VenueError::NotFound { id: id.to_string() });
        }
        Ok(())
    }
}

const VENUE_SELECT: &str = "SELECT id, name, email, token, registration_code, registered_at,
        service_times, schedule_type, expires_at, bot_token FROM venues";

fn select_one(
    db: &Connection,
    clause: &str,
    params: impl rusqlite::Params,
) -> Result<Option<Venue>> {
    match db.query_row(&format!("{VENUE_SELECT} WHERE {clause}"), params, row_to_venue) {
        Ok(v) => Ok(Some(v)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(VenueError::Database(e)),
    }
}

fn row_to_venue(row: &rusqlite::Row<'_>) -> rusqlite::Result<Venue> {
    let service_times: Vec<ServiceTime> =
        serde_json::from_str(&row.get::<_, String>(6)?).unwrap_or_default();
    let schedule_type =
        ScheduleType::from_str(&row.get::<_, String>(7)?).unwrap_or_default();
    let expires_at = row
        .get::<_, Option<String>>(8)?
        .as_deref()
        .and_then(parse_ts);
    Ok(Venue {
        id: VenueId::from(row.get::<_, String>(0)?),
        name: row.get(1)?,
        email: row.get(2)?,
        token: row.get(3)?,
        registration_code: row.get(4)?,
        registered_at: row.get(5)?,
        service_times,
        schedule_type,
        expires_at,
        bot_token: row.get(9)?,
    })
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn registration_code() -> String {
    let mut rng = rand::rng();
    (0..6)
        .map(|_| {
            let v = rng.random_range(0..16u8);
            char::from_digit(u32::from(v), 16)
                .unwrap_or('0')
                .to_ascii_uppercase()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn store() -> VenueStore {
        let conn = Connection::open_in_memory().unwrap();
        VenueStore::new(conn, "test-secret").unwrap()
    }

    #[test]
    fn register_issues_code_and_verifiable_token() {
        let store = store();
        let venue = store.register("Grace Chapel", Some("td@grace.org")).unwrap();
        assert_eq!(venue.registration_code.len(), 6);
        assert!(venue
            .registration_code
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));

        let claims = token::verify("test-secret", &venue.token).unwrap();
        assert_eq!(claims.venue_id, venue.id);
        assert_eq!(claims.name, "Grace Chapel");
    }

    #[test]
    fn duplicate_name_is_conflict_and_no_op() {
        let store = store();
        let first = store.register("Grace Chapel", None).unwrap();
        let err = store.register("Grace Chapel", None).unwrap_err();
        assert!(matches!(err, VenueError::DuplicateName { .. }));
        // Existing record untouched.
        let fetched = store.get(&first.id).unwrap().unwrap();
        assert_eq!(fetched.token, first.token);
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn lookup_by_code_is_case_insensitive() {
        let store = store();
        let venue = store.register("Hope Church", None).unwrap();
        let lower = venue.registration_code.to_lowercase();
        let found = store.get_by_code(&lower).unwrap().unwrap();
        assert_eq!(found.id, venue.id);
    }

    #[test]
    fn schedule_round_trips_and_validates() {
        let store = store();
        let venue = store.register("Hope Church", None).unwrap();
        let times = vec![ServiceTime {
            day_of_week: 0,
            start_hour: 10,
            start_min: 0,
            duration_hours: 2.0,
            label: Some("Sunday AM".into()),
        }];
        store.set_schedule(&venue.id, &times).unwrap();
        assert_eq!(store.get(&venue.id).unwrap().unwrap().service_times, times);

        let bad = vec![ServiceTime {
            day_of_week: 7,
            start_hour: 10,
            start_min: 0,
            duration_hours: 2.0,
            label: None,
        }];
        assert!(matches!(
            store.set_schedule(&venue.id, &bad),
            Err(VenueError::InvalidSchedule(_))
        ));
    }

    #[test]
    fn event_expiry_flips_schedule_type() {
        let store = store();
        let venue = store.register("Youth Camp", None).unwrap();
        let expiry = Utc::now() + Duration::days(3);
        store.set_event_expiry(&venue.id, expiry).unwrap();
        let fetched = store.get(&venue.id).unwrap().unwrap();
        assert_eq!(fetched.schedule_type, ScheduleType::Event);
        assert_eq!(
            fetched.expires_at.unwrap().timestamp(),
            expiry.timestamp()
        );
    }

    #[test]
    fn delete_removes_venue_and_maintenance() {
        let store = store();
        let venue = store.register("Hope Church", None).unwrap();
        let now = Utc::now();
        store
            .replace_maintenance(&venue.id, &[(now, now + Duration::hours(2), None)])
            .unwrap();
        store.delete(&venue.id).unwrap();
        assert!(store.get(&venue.id).unwrap().is_none());
        assert!(store.maintenance_for(&venue.id).unwrap().is_empty());
        assert!(matches!(
            store.delete(&venue.id),
            Err(VenueError::NotFound { .. })
        ));
    }

    #[test]
    fn maintenance_replace_is_total() {
        let store = store();
        let venue = store.register("Hope Church", None).unwrap();
        let now = Utc::now();
        store
            .replace_maintenance(
                &venue.id,
                &[(now, now + Duration::hours(1), Some("rewiring".into()))],
            )
            .unwrap();
        store
            .replace_maintenance(&venue.id, &[(now, now + Duration::hours(4), None)])
            .unwrap();
        let windows = store.maintenance_for(&venue.id).unwrap();
        assert_eq!(windows.len(), 1);
        assert!(windows[0].reason.is_none());
    }
}
