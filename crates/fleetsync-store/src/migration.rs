//! SQLite schema migrations.
//!
//! `MIGRATIONS[i]` takes the schema from version `i` to `i + 1`. Every
//! applied step is recorded in `schema_migrations`, all pending steps run in
//! a single transaction.

use rusqlite::{params, Connection, Transaction};

use crate::error::{Result, StoreError};

/// Ordered schema steps.
const MIGRATIONS: &[&str] = &[
    // v1: device records keyed by (org, name).
    "CREATE TABLE devices (
        org_id TEXT NOT NULL,
        name TEXT NOT NULL,
        resource_version INTEGER NOT NULL DEFAULT 0,
        spec BLOB,
        status BLOB,
        status_hash TEXT,
        deletion_timestamp TEXT,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (org_id, name)
    );
    CREATE INDEX idx_devices_updated ON devices(updated_at);",
];

/// Schema version this build writes.
pub const CURRENT_VERSION: u32 = MIGRATIONS.len() as u32;

/// Bring the schema up to [`CURRENT_VERSION`].
///
/// A database written by a newer build is refused rather than downgraded.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        );",
    )?;

    let applied = schema_version(conn)?;
    if applied > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "schema version {} is ahead of this build ({})",
            applied, CURRENT_VERSION
        )));
    }
    if applied == CURRENT_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for (index, sql) in MIGRATIONS.iter().enumerate().skip(applied as usize) {
        step(&tx, index as u32 + 1, sql)?;
    }
    tx.commit()?;
    Ok(())
}

/// Highest version recorded, 0 for a fresh database.
pub fn schema_version(conn: &Connection) -> Result<u32> {
    let version: Option<u32> =
        conn.query_row("SELECT MAX(version) FROM schema_migrations", [], |row| row.get(0))?;
    Ok(version.unwrap_or(0))
}

fn step(tx: &Transaction<'_>, version: u32, sql: &str) -> Result<()> {
    tx.execute_batch(sql)
        .map_err(|e| StoreError::Migration(format!("step {}: {}", version, e)))?;
    tx.execute(
        "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
        params![version, chrono::Utc::now().to_rfc3339()],
    )?;
    tracing::debug!(version, "applied schema migration");
    Ok(())
}
