//! Identity-keyed lifecycle-state table, independent of queue ordering.

use crate::error::TrackerError;

use super::state::CompletionState;

/// One tracked task and its lifecycle state.
#[derive(Debug)]
struct Entry<T> {
    value: T,
    state: CompletionState,
}

/// Lifecycle table for every live task.
///
/// Like [`Queue`](super::Queue), the tracker is a plain structure guarded
/// by the proxy's lock. Uniqueness of entries is the proxy's
/// responsibility; `add` does not enforce it.
#[derive(Debug)]
pub struct Tracker<T> {
    entries: Vec<Entry<T>>,
}

impl<T> Tracker<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Count tasks currently in `state`.
    pub fn count_from_state(&self, state: CompletionState) -> usize {
        self.entries.iter().filter(|e| e.state == state).count()
    }

    /// Insert a task at the `Queued` state.
    pub fn add(&mut self, value: T) {
        self.entries.push(Entry {
            value,
            state: CompletionState::Queued,
        });
    }

    pub fn has(&self, value: &T, comparator: impl Fn(&T, &T) -> bool) -> bool {
        self.entries.iter().any(|e| comparator(&e.value, value))
    }

    /// Find the tracked value matching `value` under `comparator`.
    pub fn find(&self, value: &T, comparator: impl Fn(&T, &T) -> bool) -> Option<&T> {
        self.entries
            .iter()
            .find(|e| comparator(&e.value, value))
            .map(|e| &e.value)
    }

    /// All tracked values in `state`.
    pub fn values_in_state(&self, state: CompletionState) -> Vec<&T> {
        self.entries
            .iter()
            .filter(|e| e.state == state)
            .map(|e| &e.value)
            .collect()
    }

    /// All tracked values with their states.
    pub fn iter(&self) -> impl Iterator<Item = (&T, CompletionState)> {
        self.entries.iter().map(|e| (&e.value, e.state))
    }

    pub fn get_state(
        &self,
        value: &T,
        comparator: impl Fn(&T, &T) -> bool,
    ) -> Result<CompletionState, TrackerError> {
        self.entries
            .iter()
            .find(|e| comparator(&e.value, value))
            .map(|e| e.state)
            .ok_or(TrackerError::NotFound)
    }

    pub fn set_state(
        &mut self,
        value: &T,
        state: CompletionState,
        comparator: impl Fn(&T, &T) -> bool,
    ) -> Result<(), TrackerError> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| comparator(&e.value, value))
            .ok_or(TrackerError::NotFound)?;
        entry.state = state;
        Ok(())
    }

    /// Move a task one step forward in the lifecycle.
    pub fn advance_state(
        &mut self,
        value: &T,
        comparator: impl Fn(&T, &T) -> bool,
    ) -> Result<CompletionState, TrackerError> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| comparator(&e.value, value))
            .ok_or(TrackerError::NotFound)?;
        entry.state = entry.state.advance()?;
        Ok(entry.state)
    }

    /// Move a task one step backward in the lifecycle.
    pub fn regress_state(
        &mut self,
        value: &T,
        comparator: impl Fn(&T, &T) -> bool,
    ) -> Result<CompletionState, TrackerError> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| comparator(&e.value, value))
            .ok_or(TrackerError::NotFound)?;
        entry.state = entry.state.regress()?;
        Ok(entry.state)
    }

    /// Remove a task. Running tasks cannot be removed.
    pub fn remove(
        &mut self,
        value: &T,
        comparator: impl Fn(&T, &T) -> bool,
    ) -> Result<T, TrackerError> {
        let idx = self
            .entries
            .iter()
            .position(|e| comparator(&e.value, value))
            .ok_or(TrackerError::NotFound)?;
        if self.entries[idx].state == CompletionState::Running {
            return Err(TrackerError::CannotRemoveRunning);
        }
        Ok(self.entries.remove(idx).value)
    }

    /// Remove every task that is not Running.
    pub fn remove_all(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.state == CompletionState::Running);
        before - self.entries.len()
    }

    /// Remove every task in `state`. Running tasks are guarded.
    pub fn remove_from_state(&mut self, state: CompletionState) -> Result<usize, TrackerError> {
        if state == CompletionState::Running {
            return Err(TrackerError::CannotRemoveRunning);
        }
        let before = self.entries.len();
        self.entries.retain(|e| e.state != state);
        Ok(before - self.entries.len())
    }
}

impl<T> Default for Tracker<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eq(a: &&str, b: &&str) -> bool {
        a == b
    }

    #[test]
    fn add_starts_queued() {
        let mut t = Tracker::new();
        t.add("a");
        assert_eq!(t.count(), 1);
        assert_eq!(t.get_state(&"a", eq).unwrap(), CompletionState::Queued);
        assert_eq!(t.count_from_state(CompletionState::Queued), 1);
        assert_eq!(t.count_from_state(CompletionState::Running), 0);
    }

    #[test]
    fn advance_and_regress() {
        let mut t = Tracker::new();
        t.add("a");
        assert_eq!(t.advance_state(&"a", eq).unwrap(), CompletionState::Running);
        assert_eq!(t.regress_state(&"a", eq).unwrap(), CompletionState::Queued);
        assert_eq!(
            t.regress_state(&"a", eq),
            Err(TrackerError::IllegalTransition {
                from: "queued",
                op: "regress",
            })
        );
    }

    #[test]
    fn advance_past_completed_fails() {
        let mut t = Tracker::new();
        t.add("a");
        t.advance_state(&"a", eq).unwrap();
        t.advance_state(&"a", eq).unwrap();
        assert!(t.advance_state(&"a", eq).is_err());
        // The failed advance must not have moved the state.
        assert_eq!(t.get_state(&"a", eq).unwrap(), CompletionState::Completed);
    }

    #[test]
    fn missing_task_not_found() {
        let mut t: Tracker<&str> = Tracker::new();
        assert_eq!(t.get_state(&"nope", eq), Err(TrackerError::NotFound));
        assert_eq!(t.advance_state(&"nope", eq), Err(TrackerError::NotFound));
    }

    #[test]
    fn cannot_remove_running() {
        let mut t = Tracker::new();
        t.add("a");
        t.advance_state(&"a", eq).unwrap();
        assert_eq!(t.remove(&"a", eq), Err(TrackerError::CannotRemoveRunning));
        // State unchanged by the failed removal.
        assert_eq!(t.get_state(&"a", eq).unwrap(), CompletionState::Running);
    }

    #[test]
    fn remove_all_spares_running() {
        let mut t = Tracker::new();
        t.add("a");
        t.add("b");
        t.add("c");
        t.advance_state(&"b", eq).unwrap();
        assert_eq!(t.remove_all(), 2);
        assert_eq!(t.count(), 1);
        assert!(t.has(&"b", eq));
    }

    #[test]
    fn remove_from_state_guards_running() {
        let mut t = Tracker::new();
        t.add("a");
        t.add("b");
        t.advance_state(&"a", eq).unwrap();
        assert_eq!(
            t.remove_from_state(CompletionState::Running),
            Err(TrackerError::CannotRemoveRunning)
        );
        assert_eq!(t.remove_from_state(CompletionState::Queued).unwrap(), 1);
        assert_eq!(t.count(), 1);
    }
}
