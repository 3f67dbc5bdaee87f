//! Schema migrations.
//!
//! `PRAGMA user_version` records the last applied step; opening a database
//! applies every later step in order, each inside its own transaction.

pub mod v001_initial;

use rusqlite::Connection;

use crate::error::{Result, StoreError};

type Step = fn(&Connection) -> rusqlite::Result<()>;

/// Ordered migration steps; the version of a step is its position plus one.
const STEPS: &[(&str, Step)] = &[("v001_initial", v001_initial::up)];

/// Bring `conn` up to the latest schema version.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    for (idx, (name, up)) in STEPS.iter().enumerate().skip(current as usize) {
        let version = idx as u32 + 1;
        tracing::info!(version, name, "applying database migration");

        let tx = conn.unchecked_transaction()?;
        up(&tx).map_err(|e| StoreError::Migration(format!("{name}: {e}")))?;
        tx.pragma_update(None, "user_version", version)?;
        tx.commit()?;
    }
    Ok(())
}
