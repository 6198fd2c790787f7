//! Version-tracked schema migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL; `run_migrations` applies
//! only the versions newer than what the `_migrations` table records.

use libsql::Connection;

use crate::error::StoreError;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "initial_schema",
    sql: r#"
        CREATE TABLE IF NOT EXISTS tasks (
            id TEXT PRIMARY KEY,
            aggregator TEXT NOT NULL,
            slug TEXT NOT NULL,
            display_name TEXT,
            filehost_url TEXT,
            filename TEXT,
            progress INTEGER NOT NULL DEFAULT 0,
            error TEXT,
            state INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_tasks_state ON tasks(state);
    "#,
}];

/// Apply all pending migrations.
pub async fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )",
        (),
    )
    .await
    .map_err(|e| StoreError::Query(format!("Failed to create migrations table: {e}")))?;

    let current = current_version(conn).await?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        conn.execute_batch(migration.sql)
            .await
            .map_err(|e| {
                StoreError::Query(format!(
                    "Migration {} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;

        conn.execute(
            "INSERT INTO _migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
            libsql::params![
                migration.version,
                migration.name,
                chrono::Utc::now().to_rfc3339()
            ],
        )
        .await
        .map_err(|e| StoreError::Query(format!("Failed to record migration: {e}")))?;

        tracing::debug!(version = migration.version, name = migration.name, "Applied migration");
    }

    Ok(())
}

async fn current_version(conn: &Connection) -> Result<i64, StoreError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| StoreError::Query(format!("Failed to read migration version: {e}")))?;

    match rows
        .next()
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?
    {
        Some(row) => row
            .get::<i64>(0)
            .map_err(|e| StoreError::Query(e.to_string())),
        None => Ok(0),
    }
}
