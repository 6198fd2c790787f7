//! libSQL task store — async `TaskStore` implementation.
//!
//! Supports local file and in-memory databases; a single connection is
//! reused for all operations, which matches the conservative connection
//! cap the rest of the system assumes.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, Row, params};
use tracing::info;

use crate::error::StoreError;
use crate::task::{TaskId, TaskSnapshot};
use crate::taskq::CompletionState;

use super::migrations;
use super::traits::{TaskRecord, TaskStore};

pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Open(format!("Failed to create database directory: {e}")))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Open(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Open(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;
        info!(path = %path.display(), "Task database opened");

        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| StoreError::Open(format!("Failed to create in-memory database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Open(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;

        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }
}

/// Convert `Option<String>` to a libsql Value.
fn opt_text(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

/// Parse an RFC 3339 timestamp; records written by us always are.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Column order: 0:id, 1:aggregator, 2:slug, 3:display_name,
/// 4:filehost_url, 5:filename, 6:progress, 7:error, 8:state,
/// 9:created_at, 10:updated_at.
const TASK_COLUMNS: &str =
    "id, aggregator, slug, display_name, filehost_url, filename, progress, error, state, created_at, updated_at";

fn row_to_record(row: &Row) -> Result<TaskRecord, StoreError> {
    let query = |e: libsql::Error| StoreError::Query(e.to_string());

    let state_ordinal = row.get::<i64>(8).map_err(query)?;
    let state = CompletionState::from_ordinal(state_ordinal)
        .map_err(|_| StoreError::Serialization(format!("invalid state {state_ordinal} in store")))?;

    Ok(TaskRecord {
        snapshot: TaskSnapshot {
            id: TaskId::from_raw(row.get::<String>(0).map_err(query)?),
            aggregator: row.get::<String>(1).map_err(query)?,
            slug: row.get::<String>(2).map_err(query)?,
            display_name: row.get::<String>(3).ok(),
            filehost_url: row.get::<String>(4).ok(),
            filename: row.get::<String>(5).ok(),
            progress: row.get::<i64>(6).map_err(query)?.clamp(0, 100) as u8,
            error: row.get::<String>(7).ok(),
            created_at: parse_datetime(&row.get::<String>(9).map_err(query)?),
        },
        state,
        updated_at: parse_datetime(&row.get::<String>(10).map_err(query)?),
    })
}

#[async_trait]
impl TaskStore for LibSqlStore {
    async fn insert(&self, record: &TaskRecord) -> Result<(), StoreError> {
        let snap = &record.snapshot;
        self.conn
            .execute(
                "INSERT OR REPLACE INTO tasks (id, aggregator, slug, display_name, filehost_url, filename, progress, error, state, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    snap.id.as_str().to_string(),
                    snap.aggregator.clone(),
                    snap.slug.clone(),
                    opt_text(snap.display_name.clone()),
                    opt_text(snap.filehost_url.clone()),
                    opt_text(snap.filename.clone()),
                    snap.progress as i64,
                    opt_text(snap.error.clone()),
                    record.state.ordinal(),
                    snap.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("Failed to insert task: {e}")))?;
        Ok(())
    }

    async fn get(&self, id: &TaskId) -> Result<Option<TaskRecord>, StoreError> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![id.as_str().to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        match rows.next().await.map_err(|e| StoreError::Query(e.to_string()))? {
            Some(row) => Ok(Some(row_to_record(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_all(&self) -> Result<Vec<TaskRecord>, StoreError> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY created_at"),
                (),
            )
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await.map_err(|e| StoreError::Query(e.to_string()))? {
            records.push(row_to_record(&row)?);
        }
        Ok(records)
    }

    async fn get_all_with_state(
        &self,
        state: CompletionState,
    ) -> Result<Vec<TaskRecord>, StoreError> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE state = ?1 ORDER BY created_at"),
                params![state.ordinal()],
            )
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await.map_err(|e| StoreError::Query(e.to_string()))? {
            records.push(row_to_record(&row)?);
        }
        Ok(records)
    }

    async fn update(&self, record: &TaskRecord) -> Result<(), StoreError> {
        // INSERT OR REPLACE gives upsert semantics; see the trait contract.
        let mut updated = record.clone();
        updated.updated_at = Utc::now();
        self.insert(&updated).await
    }

    async fn remove(&self, id: &TaskId) -> Result<(), StoreError> {
        self.conn
            .execute("DELETE FROM tasks WHERE id = ?1", params![id.as_str().to_string()])
            .await
            .map_err(|e| StoreError::Query(format!("Failed to remove task: {e}")))?;
        Ok(())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM tasks", ())
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        match rows.next().await.map_err(|e| StoreError::Query(e.to_string()))? {
            Some(row) => Ok(row.get::<i64>(0).map_err(|e| StoreError::Query(e.to_string()))? as usize),
            None => Ok(0),
        }
    }

    async fn count_from_state(&self, state: CompletionState) -> Result<usize, StoreError> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM tasks WHERE state = ?1",
                params![state.ordinal()],
            )
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        match rows.next().await.map_err(|e| StoreError::Query(e.to_string()))? {
            Some(row) => Ok(row.get::<i64>(0).map_err(|e| StoreError::Query(e.to_string()))? as usize),
            None => Ok(0),
        }
    }

    async fn drop_all(&self) -> Result<(), StoreError> {
        self.conn
            .execute("DELETE FROM tasks", ())
            .await
            .map_err(|e| StoreError::Query(format!("Failed to drop tasks: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;

    fn record(slug: &str, state: CompletionState) -> TaskRecord {
        TaskRecord::new(Task::new("test", slug).snapshot(), state)
    }

    #[tokio::test]
    async fn roundtrip_record() {
        let store = LibSqlStore::new_memory().await.unwrap();
        let task = Task::new("doujinstyle", "12345");
        task.set_display_name("Album");
        task.set_filename("Album.zip");
        task.set_progress(33);
        let rec = TaskRecord::new(task.snapshot(), CompletionState::Running);

        store.insert(&rec).await.unwrap();
        let loaded = store.get(rec.id()).await.unwrap().unwrap();
        assert_eq!(loaded.snapshot.slug, "12345");
        assert_eq!(loaded.snapshot.display_name.as_deref(), Some("Album"));
        assert_eq!(loaded.snapshot.progress, 33);
        assert_eq!(loaded.state, CompletionState::Running);
    }

    #[tokio::test]
    async fn state_queries() {
        let store = LibSqlStore::new_memory().await.unwrap();
        store.insert(&record("a", CompletionState::Queued)).await.unwrap();
        store.insert(&record("b", CompletionState::Running)).await.unwrap();
        store.insert(&record("c", CompletionState::Completed)).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 3);
        assert_eq!(
            store.count_from_state(CompletionState::Running).await.unwrap(),
            1
        );
        let queued = store
            .get_all_with_state(CompletionState::Queued)
            .await
            .unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].snapshot.slug, "a");
    }

    #[tokio::test]
    async fn update_then_remove() {
        let store = LibSqlStore::new_memory().await.unwrap();
        let mut rec = record("a", CompletionState::Queued);
        store.insert(&rec).await.unwrap();

        rec.state = CompletionState::Completed;
        rec.snapshot.error = Some("boom".to_string());
        store.update(&rec).await.unwrap();

        let loaded = store.get(rec.id()).await.unwrap().unwrap();
        assert_eq!(loaded.state, CompletionState::Completed);
        assert_eq!(loaded.snapshot.error.as_deref(), Some("boom"));

        store.remove(rec.id()).await.unwrap();
        assert!(store.get(rec.id()).await.unwrap().is_none());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let store = LibSqlStore::new_memory().await.unwrap();
        migrations::run_migrations(&store.conn).await.unwrap();
        migrations::run_migrations(&store.conn).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
