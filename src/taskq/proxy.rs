//! Synchronization façade over the queue and the tracker.
//!
//! The proxy is the only correct entry point for combined queue+tracker
//! mutation. Both structures live inside one lock, so the admission
//! check-then-insert and the dequeue-then-advance pairs are atomic: two
//! concurrent admissions of the same business key can never both pass the
//! existence check.

use std::sync::Arc;

use tokio::sync::{Notify, RwLock};

use crate::error::{Error, QueueError, TrackerError};

use super::queue::Queue;
use super::state::CompletionState;
use super::tracker::Tracker;

type Comparator<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

struct Inner<T> {
    queue: Queue<T>,
    tracker: Tracker<T>,
}

/// Proxy owning exactly one queue and one tracker for its lifetime.
///
/// Generic over the task payload; callers supply a business-key comparator
/// at construction (task fields mutate during execution, the key does not).
pub struct TaskProxy<T> {
    inner: RwLock<Inner<T>>,
    comparator: Comparator<T>,
    /// Wakes the runner on admission and on task completion.
    ready: Notify,
}

impl<T: Clone> TaskProxy<T> {
    /// Proxy with a comparator for the payload's business key.
    pub fn with_comparator(comparator: impl Fn(&T, &T) -> bool + Send + Sync + 'static) -> Self {
        Self {
            inner: RwLock::new(Inner {
                queue: Queue::new(),
                tracker: Tracker::new(),
            }),
            comparator: Arc::new(comparator),
            ready: Notify::new(),
        }
    }

    /// Admit a value unless an equal key is already tracked.
    ///
    /// The scan and the insert run under one write lock: on a match nothing
    /// is mutated and `AlreadyExists` is returned.
    pub async fn enqueue_if_absent(&self, value: T) -> Result<(), TrackerError> {
        self.enqueue_if_absent_with(value, &*self.comparator).await
    }

    /// Like [`enqueue_if_absent`](Self::enqueue_if_absent) with an explicit
    /// comparator.
    pub async fn enqueue_if_absent_with(
        &self,
        value: T,
        comparator: impl Fn(&T, &T) -> bool,
    ) -> Result<(), TrackerError> {
        let mut inner = self.inner.write().await;
        if inner.tracker.has(&value, &comparator) {
            return Err(TrackerError::AlreadyExists);
        }
        inner.queue.enqueue(value.clone());
        inner.tracker.add(value);
        drop(inner);

        self.ready.notify_one();
        Ok(())
    }

    /// Admit without waking the runner; pair with [`wake`](Self::wake).
    ///
    /// Lets a caller that reacts to admissions (publishing an event,
    /// writing a record) finish before the runner can pick the task up.
    pub async fn enqueue_if_absent_quiet(&self, value: T) -> Result<(), TrackerError> {
        let mut inner = self.inner.write().await;
        if inner.tracker.has(&value, &*self.comparator) {
            return Err(TrackerError::AlreadyExists);
        }
        inner.queue.enqueue(value.clone());
        inner.tracker.add(value);
        Ok(())
    }

    /// Wake the runner loop.
    pub fn wake(&self) {
        self.ready.notify_one();
    }

    /// Dequeue the next task and advance it Queued→Running as one atomic
    /// unit. A dequeue failure propagates without touching the tracker.
    pub async fn advance_new_task_state(&self) -> Result<T, Error> {
        let mut inner = self.inner.write().await;
        let value = inner.queue.dequeue().map_err(Error::Queue)?;
        inner
            .tracker
            .advance_state(&value, &*self.comparator)
            .map_err(Error::Tracker)?;
        Ok(value)
    }

    /// Find the tracked value matching `value` under the default comparator.
    pub async fn find(&self, value: &T) -> Result<T, TrackerError> {
        self.find_with_comparator(value, &*self.comparator).await
    }

    pub async fn find_with_comparator(
        &self,
        value: &T,
        comparator: impl Fn(&T, &T) -> bool,
    ) -> Result<T, TrackerError> {
        let inner = self.inner.read().await;
        inner
            .tracker
            .find(value, comparator)
            .cloned()
            .ok_or(TrackerError::NotFound)
    }

    pub async fn has(&self, value: &T) -> bool {
        let inner = self.inner.read().await;
        inner.tracker.has(value, &*self.comparator)
    }

    /// Remove a task everywhere it still exists.
    ///
    /// The queue copy may already have been dequeued by the runner, so a
    /// tracker-only deletion still counts as success. Running tasks are
    /// guarded by the tracker.
    pub async fn remove_with_comparator(
        &self,
        value: &T,
        comparator: impl Fn(&T, &T) -> bool,
    ) -> Result<T, TrackerError> {
        let mut inner = self.inner.write().await;
        if inner.tracker.get_state(value, &comparator)? == CompletionState::Running {
            return Err(TrackerError::CannotRemoveRunning);
        }
        let _ = inner.queue.remove(value, &comparator);
        inner.tracker.remove(value, &comparator)
    }

    /// Remove a task under the default comparator.
    pub async fn remove(&self, value: &T) -> Result<T, TrackerError> {
        self.remove_with_comparator(value, &*self.comparator).await
    }

    /// Bulk-remove every tracked task in `state` plus its queue copies.
    pub async fn remove_from_state(&self, state: CompletionState) -> Result<usize, TrackerError> {
        let mut inner = self.inner.write().await;
        let doomed: Vec<T> = inner
            .tracker
            .values_in_state(state)
            .into_iter()
            .cloned()
            .collect();
        let removed = inner.tracker.remove_from_state(state)?;
        for value in &doomed {
            inner.queue.remove_all(value, &*self.comparator);
        }
        Ok(removed)
    }

    /// Advance a task one lifecycle step. Wakes the runner on completion so
    /// queued work can take over the freed slot.
    pub async fn advance_task_state(&self, value: &T) -> Result<CompletionState, TrackerError> {
        let mut inner = self.inner.write().await;
        let state = inner.tracker.advance_state(value, &*self.comparator)?;
        drop(inner);

        if state == CompletionState::Completed {
            self.ready.notify_one();
        }
        Ok(state)
    }

    /// Regress a task one lifecycle step.
    pub async fn regress_task_state(&self, value: &T) -> Result<CompletionState, TrackerError> {
        let mut inner = self.inner.write().await;
        inner.tracker.regress_state(value, &*self.comparator)
    }

    pub async fn get_task_state(&self, value: &T) -> Result<CompletionState, TrackerError> {
        let inner = self.inner.read().await;
        inner.tracker.get_state(value, &*self.comparator)
    }

    /// Reset a non-Running task to Queued and re-enqueue it at the tail, so
    /// a retried task runs behind current work rather than jumping the line.
    ///
    /// Does not wake the runner; callers [`wake`](Self::wake) once their
    /// re-admission bookkeeping is done.
    pub async fn reset_task_state(&self, value: &T) -> Result<(), TrackerError> {
        let mut inner = self.inner.write().await;
        let tracked = inner
            .tracker
            .find(value, &*self.comparator)
            .cloned()
            .ok_or(TrackerError::NotFound)?;
        let state = inner.tracker.get_state(&tracked, &*self.comparator)?;
        if state == CompletionState::Running {
            return Err(TrackerError::IllegalTransition {
                from: "running",
                op: "reset",
            });
        }
        inner
            .tracker
            .set_state(&tracked, CompletionState::Queued, &*self.comparator)?;
        // Drop any stale queue copy before re-enqueueing at the tail.
        inner.queue.remove_all(&tracked, &*self.comparator);
        inner.queue.enqueue(tracked);
        Ok(())
    }

    pub async fn queue_len(&self) -> usize {
        self.inner.read().await.queue.len()
    }

    pub async fn count(&self) -> usize {
        self.inner.read().await.tracker.count()
    }

    pub async fn count_from_state(&self, state: CompletionState) -> usize {
        self.inner.read().await.tracker.count_from_state(state)
    }

    /// Every tracked value in `state`.
    pub async fn tasks_in_state(&self, state: CompletionState) -> Vec<T> {
        let inner = self.inner.read().await;
        inner
            .tracker
            .values_in_state(state)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Every tracked value with its state.
    pub async fn all_tasks(&self) -> Vec<(T, CompletionState)> {
        let inner = self.inner.read().await;
        inner
            .tracker
            .iter()
            .map(|(v, s)| (v.clone(), s))
            .collect()
    }

    /// Wait until work may be available: resolves after an admission, a
    /// retry reset, or a completion frees a concurrency slot.
    pub async fn ready(&self) {
        self.ready.notified().await;
    }
}

impl<T: Clone + PartialEq> TaskProxy<T> {
    /// Proxy comparing payloads by equality.
    pub fn new() -> Self {
        Self::with_comparator(|a: &T, b: &T| a == b)
    }
}

impl<T: Clone + PartialEq> Default for TaskProxy<T> {
    fn default() -> Self {
        Self::new()
    }
}
