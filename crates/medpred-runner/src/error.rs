//! Error types for worker execution.

use thiserror::Error;

/// Errors that can occur while launching or supervising a worker.
///
/// A worker that starts and then exits with a nonzero code is not an error
/// at this level; it is reported through [`crate::ExitOutcome`].
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The executable is missing or could not be launched.
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A piped stdio handle was not available after spawn.
    #[error("Worker {0} pipe unavailable")]
    MissingPipe(&'static str),

    /// Reading worker output or waiting for exit failed.
    #[error("Worker I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RunnerError {
    /// Returns true when the worker never started.
    pub fn is_spawn_failure(&self) -> bool {
        matches!(self, RunnerError::Spawn { .. })
    }
}
