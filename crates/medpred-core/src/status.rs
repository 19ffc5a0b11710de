//! Lifecycle of a check run.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// State of one check run.
///
/// `Idle -> Starting -> Streaming -> Completed | Failed`. A run may also fail
/// straight from `Starting` when the worker cannot be spawned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    /// Run created, worker not launched yet.
    #[default]
    Idle,
    /// Worker launch requested.
    Starting,
    /// Worker running, stdout being decoded and broadcast.
    Streaming,
    /// Worker exited with code 0.
    Completed,
    /// Worker could not be spawned or exited abnormally.
    Failed,
}

impl RunState {
    /// Returns true if the run is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns true if the run is still active (not terminal).
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Returns true if `next` is a legal successor of this state.
    pub fn can_transition_to(&self, next: RunState) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Starting)
                | (Self::Starting, Self::Streaming)
                | (Self::Starting, Self::Failed)
                | (Self::Streaming, Self::Completed)
                | (Self::Streaming, Self::Failed)
        )
    }

    /// Validate and return the next state.
    pub fn transition(self, next: RunState) -> Result<RunState, CoreError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(CoreError::InvalidStateTransition {
                from: format!("{:?}", self),
                to: format!("{:?}", next),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let state = RunState::Idle
            .transition(RunState::Starting)
            .and_then(|s| s.transition(RunState::Streaming))
            .and_then(|s| s.transition(RunState::Completed))
            .unwrap();
        assert_eq!(state, RunState::Completed);
        assert!(state.is_terminal());
    }

    #[test]
    fn test_spawn_failure_goes_straight_to_failed() {
        assert!(RunState::Starting.can_transition_to(RunState::Failed));
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [RunState::Completed, RunState::Failed] {
            assert!(terminal
                .transition(RunState::Starting)
                .is_err());
            assert!(!terminal.is_active());
        }
    }

    #[test]
    fn test_cannot_skip_starting() {
        let err = RunState::Idle.transition(RunState::Streaming).unwrap_err();
        assert!(matches!(err, CoreError::InvalidStateTransition { .. }));
    }
}
