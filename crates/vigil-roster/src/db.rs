use rusqlite::Connection;

use crate::error::Result;

/// Initialise roster, on-call, and guest token tables. Idempotent.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS roster (
            venue_id          TEXT NOT NULL,
            telegram_user_id  TEXT NOT NULL,
            name              TEXT NOT NULL,
            telegram_chat_id  INTEGER,
            phone             TEXT,
            active            INTEGER NOT NULL DEFAULT 1,
            registered_at     TEXT NOT NULL,
            PRIMARY KEY (venue_id, telegram_user_id)
        );
        CREATE TABLE IF NOT EXISTS on_call (
            venue_id          TEXT NOT NULL,
            td_name           TEXT NOT NULL,
            telegram_chat_id  INTEGER,
            telegram_user_id  TEXT NOT NULL,
            phone             TEXT,
            week_of_iso_week  TEXT NOT NULL DEFAULT '',
            is_primary        INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (venue_id, telegram_user_id)
        );
        CREATE TABLE IF NOT EXISTS guest_tokens (
            token               TEXT PRIMARY KEY NOT NULL,
            venue_id            TEXT NOT NULL,
            display_name        TEXT NOT NULL,
            created_at          TEXT NOT NULL,
            expires_at          TEXT NOT NULL,
            claimed_by_chat_id  INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_on_call_week
            ON on_call (venue_id, week_of_iso_week);",
    )?;
    Ok(())
}
