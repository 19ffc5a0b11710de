//! Drives one check run from trigger to terminal signal.
//!
//! A [`RunCoordinator`] owns exactly one run: it spawns the worker, forwards
//! every decoded stdout event to the hub in order, and finishes with exactly
//! one `check-complete` or `check-error`. Coordinators are not reused.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use medpred_core::{CheckErrorPayload, RunId, RunState};
use medpred_runner::WorkerCommand;

use crate::hub::BroadcastHub;
use crate::metrics::RunStats;

/// Coordinator for a single run.
pub struct RunCoordinator {
    run_id: RunId,
    label: String,
    command: WorkerCommand,
    hub: Arc<BroadcastHub>,
    stats: Arc<RunStats>,
    state: RunState,
}

impl RunCoordinator {
    /// Create an idle coordinator for `command`.
    pub fn new(command: WorkerCommand, hub: Arc<BroadcastHub>, stats: Arc<RunStats>) -> Self {
        let label = command.program().display().to_string();
        Self {
            run_id: RunId::generate(),
            label,
            command,
            hub,
            stats,
            state: RunState::Idle,
        }
    }

    /// Name used in error messages (defaults to the program path).
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Identifier tagged on every message of this run.
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Current state.
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Start the run in the background and return its id immediately.
    pub fn launch(self) -> (RunId, JoinHandle<RunState>) {
        let run_id = self.run_id.clone();
        let handle = tokio::spawn(self.run());
        (run_id, handle)
    }

    /// Execute the run to completion and return its terminal state.
    pub async fn run(mut self) -> RunState {
        self.advance(RunState::Starting);
        self.stats.run_started();

        let mut process = match self.command.spawn() {
            Ok(process) => process,
            Err(e) => {
                self.fail(CheckErrorPayload {
                    error: format!("Failed to start {}", self.label),
                    details: e.to_string(),
                })
                .await;
                return self.state;
            }
        };

        self.advance(RunState::Streaming);

        let mut forwarded = 0u64;
        if let Some(mut events) = process.events() {
            loop {
                match events.next_event().await {
                    Ok(Some(event)) => {
                        forwarded += 1;
                        self.hub.broadcast(&self.run_id, event).await;
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(run_id = %self.run_id, error = %e, "Stopped reading worker stdout");
                        break;
                    }
                }
            }
            info!(
                run_id = %self.run_id,
                forwarded,
                malformed = events.parser().malformed_count(),
                "Worker output stream finished"
            );
        }

        match process.wait().await {
            Ok(outcome) if outcome.success() => {
                self.advance(RunState::Completed);
                self.stats.run_finished(RunState::Completed);
                self.hub.broadcast_complete(&self.run_id).await;
            }
            Ok(outcome) => {
                error!(
                    run_id = %self.run_id,
                    outcome = %outcome.describe(),
                    stderr = %outcome.stderr,
                    "Check worker failed"
                );
                self.fail(CheckErrorPayload {
                    error: format!("Error while running {} ({})", self.label, outcome.describe()),
                    details: outcome.stderr,
                })
                .await;
            }
            Err(e) => {
                self.fail(CheckErrorPayload {
                    error: format!("Error while running {}", self.label),
                    details: e.to_string(),
                })
                .await;
            }
        }

        self.state
    }

    async fn fail(&mut self, payload: CheckErrorPayload) {
        self.advance(RunState::Failed);
        self.stats.run_finished(RunState::Failed);
        self.hub.broadcast_error(&self.run_id, payload).await;
    }

    fn advance(&mut self, next: RunState) {
        match self.state.transition(next) {
            Ok(state) => {
                info!(run_id = %self.run_id, from = ?self.state, to = ?state, "Run state changed");
                self.state = state;
            }
            Err(e) => error!(run_id = %self.run_id, error = %e, "Rejected run state change"),
        }
    }
}
