//! Task persistence.
//!
//! `TaskStore` is the storage seam: a libSQL-backed implementation for
//! normal operation and an in-memory one that the service degrades to
//! when the database cannot be opened, so a broken disk never prevents
//! the downloader from running.

pub mod libsql_backend;
pub mod memory;
pub mod migrations;
pub mod traits;

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::Error;
use crate::task::Task;
use crate::taskq::{CompletionState, TaskProxy};

pub use libsql_backend::LibSqlStore;
pub use memory::MemoryStore;
pub use traits::{TaskRecord, TaskStore};

/// Open the task store at `db_path`, or fall back to a volatile
/// in-memory store when the path is unset or the database fails to open.
pub async fn open_store(db_path: Option<&Path>) -> Arc<dyn TaskStore> {
    match db_path {
        Some(path) => match LibSqlStore::new_local(path).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to open task database, falling back to in-memory store");
                Arc::new(MemoryStore::new())
            }
        },
        None => {
            info!("No database path configured, using in-memory store");
            Arc::new(MemoryStore::new())
        }
    }
}

/// Re-admit unfinished work after a restart.
///
/// Every record left in `Running` or `Queued` is reset to `Queued`
/// (clearing any stale error) and pushed back through the proxy, so
/// tasks that were mid-flight when the process died are retried rather
/// than lost. Returns the number of tasks re-admitted.
pub async fn reconcile(
    store: &Arc<dyn TaskStore>,
    proxy: &TaskProxy<Arc<Task>>,
) -> Result<usize, Error> {
    let mut restored = 0;

    for state in [CompletionState::Running, CompletionState::Queued] {
        for mut record in store.get_all_with_state(state).await? {
            record.state = CompletionState::Queued;
            record.snapshot.error = None;
            record.snapshot.progress = 0;
            store.update(&record).await?;

            let task = Task::from_snapshot(&record.snapshot);
            match proxy.enqueue_if_absent(task).await {
                Ok(()) => restored += 1,
                // Same identity in both passes, or already re-admitted.
                Err(_) => {}
            }
        }
    }

    if restored > 0 {
        info!(count = restored, "Re-admitted unfinished tasks from store");
    }
    Ok(restored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::same_key;

    fn record(slug: &str, state: CompletionState) -> TaskRecord {
        TaskRecord::new(Task::new("test", slug).snapshot(), state)
    }

    #[tokio::test]
    async fn open_store_without_path_degrades_to_memory() {
        let store = open_store(None).await;
        assert_eq!(store.count().await.unwrap(), 0);
        store.insert(&record("a", CompletionState::Queued)).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn reconcile_requeues_unfinished_work() {
        let store: Arc<dyn TaskStore> = Arc::new(MemoryStore::new());
        let mut running = record("was-running", CompletionState::Running);
        running.snapshot.error = Some("interrupted".into());
        running.snapshot.progress = 60;
        store.insert(&running).await.unwrap();
        store.insert(&record("was-queued", CompletionState::Queued)).await.unwrap();
        store.insert(&record("done", CompletionState::Completed)).await.unwrap();

        let proxy = TaskProxy::with_comparator(same_key);
        let restored = reconcile(&store, &proxy).await.unwrap();
        assert_eq!(restored, 2);

        assert_eq!(proxy.queue_len().await, 2);
        assert_eq!(proxy.count_from_state(CompletionState::Queued).await, 2);

        // The store reflects the reset, including the cleared error.
        let loaded = store.get(running.id()).await.unwrap().unwrap();
        assert_eq!(loaded.state, CompletionState::Queued);
        assert!(loaded.snapshot.error.is_none());
        assert_eq!(loaded.snapshot.progress, 0);

        // Completed records stay untouched.
        assert_eq!(
            store.count_from_state(CompletionState::Completed).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn reconcile_is_idempotent() {
        let store: Arc<dyn TaskStore> = Arc::new(MemoryStore::new());
        store.insert(&record("a", CompletionState::Queued)).await.unwrap();

        let proxy = TaskProxy::with_comparator(same_key);
        assert_eq!(reconcile(&store, &proxy).await.unwrap(), 1);
        assert_eq!(reconcile(&store, &proxy).await.unwrap(), 0);
        assert_eq!(proxy.queue_len().await, 1);
    }
}
