//! Download task — one unit of work for a single content item.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Task identity, derived from the aggregator name and source slug.
///
/// The slug is the business key: it never changes over the task's lifetime,
/// while almost every other field is mutated during execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(aggregator: &str, slug: &str) -> Self {
        Self(format!("{aggregator}:{}", slug.trim()))
    }

    /// Wrap an identity string that was previously produced by [`TaskId::new`].
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fields mutated by the runner and resolution collaborators.
#[derive(Debug, Default)]
struct TaskDetails {
    display_name: Option<String>,
    filehost_url: Option<String>,
    filename: Option<String>,
    progress: u8,
    error: Option<String>,
}

/// A single content item to retrieve.
///
/// Shared as `Arc<Task>`; the immutable identity fields are plain, the
/// execution-mutable fields sit behind an inner lock so the tracker, the
/// broker, and the push stream can read a consistent snapshot at any time.
#[derive(Debug)]
pub struct Task {
    id: TaskId,
    aggregator: String,
    slug: String,
    created_at: DateTime<Utc>,
    cancel_tx: watch::Sender<bool>,
    details: RwLock<TaskDetails>,
}

impl Task {
    pub fn new(aggregator: impl Into<String>, slug: impl Into<String>) -> Arc<Self> {
        let aggregator = aggregator.into();
        let slug = slug.into();
        let (cancel_tx, _) = watch::channel(false);
        Arc::new(Self {
            id: TaskId::new(&aggregator, &slug),
            aggregator,
            slug,
            created_at: Utc::now(),
            cancel_tx,
            details: RwLock::new(TaskDetails::default()),
        })
    }

    /// Rebuild a task from a persisted snapshot (startup reconciliation).
    pub fn from_snapshot(snap: &TaskSnapshot) -> Arc<Self> {
        let (cancel_tx, _) = watch::channel(false);
        Arc::new(Self {
            id: snap.id.clone(),
            aggregator: snap.aggregator.clone(),
            slug: snap.slug.clone(),
            created_at: snap.created_at,
            cancel_tx,
            details: RwLock::new(TaskDetails {
                display_name: snap.display_name.clone(),
                filehost_url: snap.filehost_url.clone(),
                filename: snap.filename.clone(),
                progress: snap.progress,
                error: snap.error.clone(),
            }),
        })
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn aggregator(&self) -> &str {
        &self.aggregator
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn set_display_name(&self, name: impl Into<String>) {
        self.details.write().unwrap().display_name = Some(name.into());
    }

    pub fn set_filehost_url(&self, url: impl Into<String>) {
        self.details.write().unwrap().filehost_url = Some(url.into());
    }

    pub fn filehost_url(&self) -> Option<String> {
        self.details.read().unwrap().filehost_url.clone()
    }

    pub fn set_filename(&self, filename: impl Into<String>) {
        self.details.write().unwrap().filename = Some(filename.into());
    }

    /// Set the progress percentage, clamped to 0–100.
    pub fn set_progress(&self, percent: u8) {
        self.details.write().unwrap().progress = percent.min(100);
    }

    pub fn progress(&self) -> u8 {
        self.details.read().unwrap().progress
    }

    /// Record a terminal error on the task.
    pub fn record_error(&self, error: impl Into<String>) {
        self.details.write().unwrap().error = Some(error.into());
    }

    /// Clear a previously recorded error (retry path).
    pub fn clear_error(&self) {
        let mut details = self.details.write().unwrap();
        details.error = None;
        details.progress = 0;
    }

    pub fn error(&self) -> Option<String> {
        self.details.read().unwrap().error.clone()
    }

    /// Signal cooperative cancellation to the running execution.
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }

    /// Receiver side of the cancellation signal.
    pub fn cancel_signal(&self) -> watch::Receiver<bool> {
        self.cancel_tx.subscribe()
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_tx.borrow()
    }

    /// Consistent point-in-time view for persistence and the push stream.
    pub fn snapshot(&self) -> TaskSnapshot {
        let details = self.details.read().unwrap();
        TaskSnapshot {
            id: self.id.clone(),
            aggregator: self.aggregator.clone(),
            slug: self.slug.clone(),
            display_name: details.display_name.clone(),
            filehost_url: details.filehost_url.clone(),
            filename: details.filename.clone(),
            progress: details.progress,
            error: details.error.clone(),
            created_at: self.created_at,
        }
    }
}

/// Comparator matching tasks by business key (slug-derived id).
pub fn same_key(a: &Arc<Task>, b: &Arc<Task>) -> bool {
    a.id == b.id
}

/// Serializable point-in-time view of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub aggregator: String,
    pub slug: String,
    pub display_name: Option<String>,
    pub filehost_url: Option<String>,
    pub filename: Option<String>,
    pub progress: u8,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}
