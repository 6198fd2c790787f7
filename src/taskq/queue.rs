//! FIFO admission queue.

use std::collections::VecDeque;

use crate::error::QueueError;

/// Ordered FIFO of admitted task values.
///
/// The queue itself is a plain structure: all access runs under the
/// [`TaskProxy`](super::TaskProxy) lock, which is what makes enqueue and
/// dequeue appear atomic to concurrent callers.
#[derive(Debug)]
pub struct Queue<T> {
    items: VecDeque<T>,
}

impl<T> Queue<T> {
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Append at the tail. Always succeeds.
    pub fn enqueue(&mut self, value: T) {
        self.items.push_back(value);
    }

    /// Remove and return the head.
    pub fn dequeue(&mut self) -> Result<T, QueueError> {
        self.items.pop_front().ok_or(QueueError::EmptyQueue)
    }

    /// Peek at the head without removing it.
    pub fn front(&self) -> Result<&T, QueueError> {
        self.items.front().ok_or(QueueError::EmptyQueue)
    }

    /// Peek at the tail without removing it.
    pub fn back(&self) -> Result<&T, QueueError> {
        self.items.back().ok_or(QueueError::EmptyQueue)
    }

    /// Whether any entry matches `value` under `comparator`.
    pub fn has(&self, value: &T, comparator: impl Fn(&T, &T) -> bool) -> bool {
        self.items.iter().any(|item| comparator(item, value))
    }

    /// Remove the first entry matching `value` under `comparator`.
    pub fn remove(&mut self, value: &T, comparator: impl Fn(&T, &T) -> bool) -> Result<T, QueueError> {
        self.items
            .iter()
            .position(|item| comparator(item, value))
            .and_then(|idx| self.items.remove(idx))
            .ok_or(QueueError::NotFound)
    }

    /// Remove every entry matching `value` under `comparator`. Returns the
    /// number removed.
    pub fn remove_all(&mut self, value: &T, comparator: impl Fn(&T, &T) -> bool) -> usize {
        let before = self.items.len();
        self.items.retain(|item| !comparator(item, value));
        before - self.items.len()
    }

    /// Drop every entry.
    pub fn reset(&mut self) {
        self.items.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}
