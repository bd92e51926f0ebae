use std::str::FromStr;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::Connection;
use tracing::info;

use vigil_core::{AlertId, Severity, VenueId};

use crate::db::init_db;
use crate::error::{AlertError, Result};
use crate::types::{Alert, AlertState};

/// Persisted alert records. Single writer behind a mutex, same policy as
/// the venue store.
pub struct AlertStore {
    db: Mutex<Connection>,
}

impl AlertStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self { db: Mutex::new(conn) })
    }

    pub fn insert(&self, alert: &Alert) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO alerts
             (id, venue_id, kind, alert_type, message, context, state,
              auto_resolved, escalated, resolved, acknowledged_at, acknowledged_by, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)",
            rusqlite::params![
                alert.id.as_str(),
                alert.venue_id.as_str(),
                alert.kind.to_string(),
                alert.alert_type,
                alert.message,
                alert.context.to_string(),
                alert.state.to_string(),
                alert.auto_resolved,
                alert.escalated,
                alert.resolved,
                alert.acknowledged_at,
                alert.acknowledged_by,
                alert.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, id: &AlertId) -> Result<Option<Alert>> {
        let db = self.db.lock().unwrap();
        self.select_one(&db, "id = ?1", rusqlite::params![id.as_str()])
    }

    /// Resolve a chat ack token (`/ack_xxxxxxxx`) to its alert. The short
    /// form is the first 8 hex chars of the UUID.
    pub fn get_by_short(&self, short: &str) -> Result<Option<Alert>> {
        let db = self.db.lock().unwrap();
        self.select_one(
            &db,
            "substr(id, 1, 8) = ?1",
            rusqlite::params![short.to_lowercase()],
        )
    }

    /// Acknowledge an alert: terminal unless it was already terminal.
    /// Returns the updated record.
    pub fn acknowledge(&self, id: &AlertId, responder: &str) -> Result<Alert> {
        let now = Utc::now().to_rfc3339();
        {
            let db = self.db.lock().unwrap();
            let n = db.execute(
                "UPDATE alerts
                 SET state = 'acknowledged', resolved = 1,
                     acknowledged_at = ?1, acknowledged_by = ?2
                 WHERE id = ?3",
                rusqlite::params![now, responder, id.as_str()],
            )?;
            if n == 0 {
                return Err(AlertError::NotFound { id: id.to_string() });
            }
        }
        info!(alert_id = %id, responder, "alert acknowledged");
        self.get(id)?.ok_or_else(|| AlertError::NotFound { id: id.to_string() })
    }

    pub fn mark_escalated(&self, id: &AlertId) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE alerts SET state = 'escalated', escalated = 1 WHERE id = ?1",
            rusqlite::params![id.as_str()],
        )?;
        if n == 0 {
            return Err(AlertError::NotFound { id: id.to_string() });
        }
        Ok(())
    }

    pub fn set_state(&self, id: &AlertId, state: AlertState) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE alerts SET state = ?1 WHERE id = ?2",
            rusqlite::params![state.to_string(), id.as_str()],
        )?;
        if n == 0 {
            return Err(AlertError::NotFound { id: id.to_string() });
        }
        Ok(())
    }

    pub fn recent(&self, venue_id: Option<&VenueId>, limit: usize) -> Result<Vec<Alert>> {
        let db = self.db.lock().unwrap();
        let mut out = Vec::new();
        match venue_id {
            Some(v) => {
                let mut stmt = db.prepare(&format!(
                    "{ALERT_SELECT} WHERE venue_id = ?1 ORDER BY created_at DESC LIMIT ?2"
                ))?;
                let rows =
                    stmt.query_map(rusqlite::params![v.as_str(), limit as i64], row_to_alert)?;
                out.extend(rows.filter_map(|r| r.ok()));
            }
            None => {
                let mut stmt = stmt_all(&db)?;
                let rows = stmt.query_map(rusqlite::params![limit as i64], row_to_alert)?;
                out.extend(rows.filter_map(|r| r.ok()));
            }
        }
        Ok(out)
    }

    fn select_one(
        &self,
        db: &Connection,
        clause: &str,
        params: impl rusqlite::Params,
    ) -> Result<Option<Alert>> {
        match db.query_row(
            &format!("{ALERT_SELECT} WHERE {clause}"),
            params,
            row_to_alert,
        ) {
            Ok(a) => Ok(Some(a)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(AlertError::Database(e)),
        }
    }
}

const ALERT_SELECT: &str = "SELECT id, venue_id, kind, alert_type, message, context, state,
        auto_resolved, escalated, resolved, acknowledged_at, acknowledged_by, created_at
        FROM alerts";

fn stmt_all(db: &Connection) -> rusqlite::Result<rusqlite::Statement<'_>> {
    db.prepare(&format!("{ALERT_SELECT} ORDER BY created_at DESC LIMIT ?1"))
}

fn row_to_alert(row: &rusqlite::Row<'_>) -> rusqlite::Result<Alert> {
    let kind = Severity::from_str(&row.get::<_, String>(2)?).unwrap_or_default();
    let state = AlertState::from_str(&row.get::<_, String>(6)?).unwrap_or(AlertState::New);
    let context =
        serde_json::from_str(&row.get::<_, String>(5)?).unwrap_or(serde_json::Value::Null);
    Ok(Alert {
        id: AlertId::from(row.get::<_, String>(0)?),
        venue_id: VenueId::from(row.get::<_, String>(1)?),
        kind,
        alert_type: row.get(3)?,
        message: row.get(4)?,
        context,
        state,
        auto_resolved: row.get(7)?,
        escalated: row.get(8)?,
        resolved: row.get(9)?,
        acknowledged_at: row.get(10)?,
        acknowledged_by: row.get(11)?,
        created_at: row.get(12)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> AlertStore {
        AlertStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    fn sample(venue: &str) -> Alert {
        Alert {
            id: AlertId::new(),
            venue_id: VenueId::from(venue),
            kind: Severity::Critical,
            alert_type: "stream_stopped".into(),
            message: "Stream stopped unexpectedly".into(),
            context: json!({ "bitrate": 0 }),
            state: AlertState::Notified,
            auto_resolved: false,
            escalated: false,
            resolved: false,
            acknowledged_at: None,
            acknowledged_by: None,
            created_at: Utc::now().to_rfc3339(),
        }
    }

    #[test]
    fn insert_and_fetch_round_trip() {
        let store = store();
        let alert = sample("v-1");
        store.insert(&alert).unwrap();
        let fetched = store.get(&alert.id).unwrap().unwrap();
        assert_eq!(fetched.alert_type, "stream_stopped");
        assert_eq!(fetched.kind, Severity::Critical);
        assert_eq!(fetched.context["bitrate"], 0);
    }

    #[test]
    fn short_token_lookup() {
        let store = store();
        let alert = sample("v-1");
        store.insert(&alert).unwrap();
        let short = alert.id.short();
        let fetched = store.get_by_short(&short).unwrap().unwrap();
        assert_eq!(fetched.id, alert.id);
        // Uppercase token from a chat client still resolves.
        assert!(store.get_by_short(&short.to_uppercase()).unwrap().is_some());
    }

    #[test]
    fn acknowledge_is_terminal_and_recorded() {
        let store = store();
        let alert = sample("v-1");
        store.insert(&alert).unwrap();
        let acked = store.acknowledge(&alert.id, "Dana").unwrap();
        assert_eq!(acked.state, AlertState::Acknowledged);
        assert!(acked.resolved);
        assert_eq!(acked.acknowledged_by.as_deref(), Some("Dana"));
        assert!(acked.acknowledged_at.is_some());
    }

    #[test]
    fn escalation_flags_row() {
        let store = store();
        let alert = sample("v-1");
        store.insert(&alert).unwrap();
        store.mark_escalated(&alert.id).unwrap();
        let fetched = store.get(&alert.id).unwrap().unwrap();
        assert!(fetched.escalated);
        assert_eq!(fetched.state, AlertState::Escalated);
    }

    #[test]
    fn recent_filters_by_venue_and_orders_newest_first() {
        let store = store();
        for i in 0..3 {
            let mut alert = sample("v-1");
            alert.created_at = format!("2026-08-01T0{i}:00:00Z");
            store.insert(&alert).unwrap();
        }
        store.insert(&sample("v-2")).unwrap();

        let recent = store.recent(Some(&VenueId::from("v-1")), 10).unwrap();
        assert_eq!(recent.len(), 3);
        assert!(recent[0].created_at > recent[2].created_at);
        assert_eq!(store.recent(None, 10).unwrap().len(), 4);
    }

    #[test]
    fn missing_alert_is_not_found() {
        let store = store();
        assert!(matches!(
            store.acknowledge(&AlertId::new(), "x"),
            Err(AlertError::NotFound { .. })
        ));
    }
}
