//! In-memory task store.
//!
//! The fallback backend when the durable database cannot be opened, and
//! the default for tests. Records do not survive a restart.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::task::TaskId;
use crate::taskq::CompletionState;

use super::traits::{TaskRecord, TaskStore};

#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<TaskId, TaskRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn insert(&self, record: &TaskRecord) -> Result<(), StoreError> {
        self.records
            .write()
            .await
            .insert(record.id().clone(), record.clone());
        Ok(())
    }

    async fn get(&self, id: &TaskId) -> Result<Option<TaskRecord>, StoreError> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn get_all(&self) -> Result<Vec<TaskRecord>, StoreError> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn get_all_with_state(
        &self,
        state: CompletionState,
    ) -> Result<Vec<TaskRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.state == state)
            .cloned()
            .collect())
    }

    async fn update(&self, record: &TaskRecord) -> Result<(), StoreError> {
        let mut updated = record.clone();
        updated.updated_at = Utc::now();
        self.records
            .write()
            .await
            .insert(updated.id().clone(), updated);
        Ok(())
    }

    async fn remove(&self, id: &TaskId) -> Result<(), StoreError> {
        self.records.write().await.remove(id);
        Ok(())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.records.read().await.len())
    }

    async fn count_from_state(&self, state: CompletionState) -> Result<usize, StoreError> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.state == state)
            .count())
    }

    async fn drop_all(&self) -> Result<(), StoreError> {
        self.records.write().await.clear();
        Ok(())
    }
}
