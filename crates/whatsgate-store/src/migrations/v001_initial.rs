//! v001 -- Initial schema creation.
//!
//! Creates the `devices` table holding one row per linked device.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Linked devices
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS devices (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    jid         TEXT UNIQUE,                  -- full AD JID; NULL for broken pairings
    push_name   TEXT NOT NULL DEFAULT '',
    platform    TEXT NOT NULL DEFAULT '',
    credentials BLOB NOT NULL,                -- opaque, owned by the protocol client
    created_at  TEXT NOT NULL,                -- RFC-3339
    updated_at  TEXT NOT NULL
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
