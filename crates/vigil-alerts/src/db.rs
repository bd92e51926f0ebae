use rusqlite::Connection;

use crate::error::Result;

/// Initialise the alerts table. Idempotent.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS alerts (
            id               TEXT PRIMARY KEY NOT NULL,
            venue_id         TEXT NOT NULL,
            kind             TEXT NOT NULL,
            alert_type       TEXT NOT NULL,
            message          TEXT NOT NULL,
            context          TEXT NOT NULL DEFAULT '{}',  -- JSON
            state            TEXT NOT NULL,
            auto_resolved    INTEGER NOT NULL DEFAULT 0,
            escalated        INTEGER NOT NULL DEFAULT 0,
            resolved         INTEGER NOT NULL DEFAULT 0,
            acknowledged_at  TEXT,
            acknowledged_by  TEXT,
            created_at       TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_alerts_venue
            ON alerts (venue_id, created_at DESC);",
    )?;
    Ok(())
}
