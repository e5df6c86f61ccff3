//! Schema migrations for the session database.
//!
//! Each entry in `MIGRATIONS` is applied once, in version order, and
//! recorded in `schema_migrations`.

use rusqlite::Connection;
use tracing::info;

use parley_core::error::ParleyError;

/// `(version, name, sql)` in ascending version order.
const MIGRATIONS: &[(i64, &str, &str)] = &[(
    1,
    "kv_entries",
    "CREATE TABLE IF NOT EXISTS kv_entries (
        key         TEXT PRIMARY KEY NOT NULL,
        value       TEXT NOT NULL,
        updated_at  INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_kv_entries_updated_at
        ON kv_entries (updated_at DESC);",
)];

fn storage_err(context: &str) -> impl Fn(rusqlite::Error) -> ParleyError + '_ {
    move |e| ParleyError::Storage(format!("{}: {}", context, e))
}

/// Bring the schema up to the latest version. Safe to call on every open.
pub fn run_migrations(conn: &Connection) -> Result<(), ParleyError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(storage_err("create schema_migrations"))?;

    let applied: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(storage_err("read schema version"))?;

    for &(version, name, sql) in MIGRATIONS.iter().filter(|(v, _, _)| *v > applied) {
        conn.execute_batch(sql)
            .map_err(storage_err("apply migration"))?;
        conn.execute(
            "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
            rusqlite::params![version, name],
        )
        .map_err(storage_err("record migration"))?;
        info!(version, name, "Applied schema migration");
    }

    Ok(())
}
