//! Backend-agnostic persistence trait for durable task records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::task::{TaskId, TaskSnapshot};
use crate::taskq::CompletionState;

/// A durable task record: the serializable task view plus its lifecycle
/// state and last-write timestamp.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub snapshot: TaskSnapshot,
    pub state: CompletionState,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn new(snapshot: TaskSnapshot, state: CompletionState) -> Self {
        Self {
            snapshot,
            state,
            updated_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.snapshot.id
    }
}

/// Durable task storage.
///
/// Writes for one task identity are serialized by the runner's terminal
/// path, so backends need no per-record locking beyond their own
/// connection discipline.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn insert(&self, record: &TaskRecord) -> Result<(), StoreError>;

    async fn get(&self, id: &TaskId) -> Result<Option<TaskRecord>, StoreError>;

    async fn get_all(&self) -> Result<Vec<TaskRecord>, StoreError>;

    async fn get_all_with_state(
        &self,
        state: CompletionState,
    ) -> Result<Vec<TaskRecord>, StoreError>;

    /// Upsert: records that disappeared underneath us (e.g. a pruned DB)
    /// are re-created rather than erroring.
    async fn update(&self, record: &TaskRecord) -> Result<(), StoreError>;

    async fn remove(&self, id: &TaskId) -> Result<(), StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;

    async fn count_from_state(&self, state: CompletionState) -> Result<usize, StoreError>;

    /// Delete every record.
    async fn drop_all(&self) -> Result<(), StoreError>;
}
