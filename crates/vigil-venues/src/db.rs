use rusqlite::Connection;

use crate::error::Result;

/// Initialise the venues tables. Safe to call on every startup — uses
/// `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS venues (
            id                 TEXT PRIMARY KEY NOT NULL,
            name               TEXT NOT NULL UNIQUE,
            email              TEXT,
            token              TEXT NOT NULL,
            registration_code  TEXT NOT NULL UNIQUE,
            registered_at      TEXT NOT NULL,
            service_times      TEXT NOT NULL DEFAULT '[]',  -- JSON array
            schedule_type      TEXT NOT NULL DEFAULT 'recurring',
            expires_at         TEXT,
            bot_token          TEXT
        );
        CREATE TABLE IF NOT EXISTS maintenance_windows (
            id         TEXT PRIMARY KEY NOT NULL,
            venue_id   TEXT NOT NULL REFERENCES venues(id),
            starts_at  TEXT NOT NULL,
            ends_at    TEXT NOT NULL,
            reason     TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_maintenance_venue
            ON maintenance_windows (venue_id, ends_at);",
    )?;
    Ok(())
}

/// Open a connection in WAL mode. One writer at a time is enforced by the
/// store's mutex; WAL lets readers proceed alongside it.
pub fn open(path: &str) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    Ok(conn)
}
