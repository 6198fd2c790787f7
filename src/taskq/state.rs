//! Task lifecycle states.

use serde::{Deserialize, Serialize};

use crate::error::TrackerError;

/// Completion state of a tracked task.
///
/// The lifecycle is linear: `Queued → Running → Completed`. `advance` and
/// `regress` move by exactly one step and fail at the bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionState {
    Queued = 0,
    Running = 1,
    Completed = 2,
}

impl CompletionState {
    /// Next state in the lifecycle.
    pub fn advance(self) -> Result<Self, TrackerError> {
        match self {
            Self::Queued => Ok(Self::Running),
            Self::Running => Ok(Self::Completed),
            Self::Completed => Err(TrackerError::IllegalTransition {
                from: "completed",
                op: "advance",
            }),
        }
    }

    /// Previous state in the lifecycle.
    pub fn regress(self) -> Result<Self, TrackerError> {
        match self {
            Self::Queued => Err(TrackerError::IllegalTransition {
                from: "queued",
                op: "regress",
            }),
            Self::Running => Ok(Self::Queued),
            Self::Completed => Ok(Self::Running),
        }
    }

    /// Numeric form used by the store and by HTTP query parameters.
    pub fn ordinal(self) -> i64 {
        self as i64
    }

    /// Parse an untrusted ordinal. Fails `InvalidState` outside [0, 2].
    pub fn from_ordinal(value: i64) -> Result<Self, TrackerError> {
        match value {
            0 => Ok(Self::Queued),
            1 => Ok(Self::Running),
            2 => Ok(Self::Completed),
            other => Err(TrackerError::InvalidState(other)),
        }
    }
}

impl std::fmt::Display for CompletionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_walks_lifecycle_once() {
        let s = CompletionState::Queued;
        let s = s.advance().unwrap();
        assert_eq!(s, CompletionState::Running);
        let s = s.advance().unwrap();
        assert_eq!(s, CompletionState::Completed);
        assert_eq!(
            s.advance(),
            Err(TrackerError::IllegalTransition {
                from: "completed",
                op: "advance",
            })
        );
    }

    #[test]
    fn regress_fails_at_initial_bound() {
        assert!(CompletionState::Queued.regress().is_err());
        assert_eq!(
            CompletionState::Running.regress().unwrap(),
            CompletionState::Queued
        );
    }

    #[test]
    fn ordinal_roundtrip() {
        for s in [
            CompletionState::Queued,
            CompletionState::Running,
            CompletionState::Completed,
        ] {
            assert_eq!(CompletionState::from_ordinal(s.ordinal()).unwrap(), s);
        }
        assert_eq!(
            CompletionState::from_ordinal(3),
            Err(TrackerError::InvalidState(3))
        );
        assert_eq!(
            CompletionState::from_ordinal(-1),
            Err(TrackerError::InvalidState(-1))
        );
    }

    #[test]
    fn serde_snake_case() {
        assert_eq!(
            serde_json::to_string(&CompletionState::Running).unwrap(),
            "\"running\""
        );
    }
}
