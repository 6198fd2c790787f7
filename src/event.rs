//! Lifecycle events and their fan-out to observers.
//!
//! The broker decouples the runner from delivery transports: the runner
//! publishes, the WebSocket layer (and anything else) subscribes. Delivery
//! is buffered and non-blocking, so a slow or dead subscriber can never
//! stall the download pipeline.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::task::{TaskId, TaskSnapshot};

/// Broadcast buffer per subscriber. Laggards drop the oldest events.
const BROKER_CAPACITY: usize = 256;

/// A task lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    /// Task accepted into the queue.
    Admitted { task: TaskSnapshot },
    /// Task handed to an execution slot.
    Activated { id: TaskId },
    /// Download progress changed.
    Progress { id: TaskId, percent: u8 },
    /// Task finished successfully.
    Completed { task: TaskSnapshot },
    /// Task finished with an error (including cancellation).
    Failed { task: TaskSnapshot },
    /// Task removed from the system.
    Removed { id: TaskId },
}

/// Fan-out publisher for [`TaskEvent`]s.
///
/// Constructed once and passed by reference to the components that need
/// it; there is deliberately no process-wide registry.
pub struct Broker {
    // `None` once closed; dropping the sender is what disconnects receivers.
    tx: Mutex<Option<broadcast::Sender<TaskEvent>>>,
}

impl Broker {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROKER_CAPACITY);
        Self {
            tx: Mutex::new(Some(tx)),
        }
    }

    /// Deliver `event` to every current subscriber. No-op after `close`,
    /// and fine with zero subscribers.
    pub fn publish(&self, event: TaskEvent) {
        if let Some(tx) = self.tx.lock().unwrap().as_ref() {
            let _ = tx.send(event);
        }
    }

    /// Subscribe to all future events. After `close` the receiver reports
    /// the channel as closed on the first `recv`.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        match self.tx.lock().unwrap().as_ref() {
            Some(tx) => tx.subscribe(),
            None => closed_receiver(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx
            .lock()
            .unwrap()
            .as_ref()
            .map_or(0, |tx| tx.receiver_count())
    }

    /// Stop delivering events and disconnect every subscriber. Existing
    /// receivers drain what is buffered and then observe a closed channel.
    pub fn close(&self) {
        self.tx.lock().unwrap().take();
    }
}

fn closed_receiver() -> broadcast::Receiver<TaskEvent> {
    let (tx, rx) = broadcast::channel(1);
    drop(tx);
    rx
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}
