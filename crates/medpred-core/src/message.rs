//! Messages pushed to real-time subscribers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::RunId;

/// Diagnostic payload of a `check-error` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckErrorPayload {
    /// Human readable summary.
    pub error: String,
    /// Accumulated worker stderr, or the spawn error when the worker never started.
    pub details: String,
}

/// A message delivered to every connected subscriber.
///
/// Serialized as `{"event": "<kind>", "run_id": "...", "data": ...}`. The
/// `data` of a `check-result` is the decoded worker line, passed through as is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum HubMessage {
    /// One decoded JSON line of worker stdout.
    CheckResult { run_id: RunId, data: Value },
    /// The run failed to spawn or exited nonzero.
    CheckError {
        run_id: RunId,
        data: CheckErrorPayload,
    },
    /// The run exited with code 0.
    CheckComplete { run_id: RunId },
}

impl HubMessage {
    /// Wire name of the message kind.
    pub fn kind(&self) -> &'static str {
        match self {
            HubMessage::CheckResult { .. } => "check-result",
            HubMessage::CheckError { .. } => "check-error",
            HubMessage::CheckComplete { .. } => "check-complete",
        }
    }

    /// The run this message belongs to.
    pub fn run_id(&self) -> &RunId {
        match self {
            HubMessage::CheckResult { run_id, .. }
            | HubMessage::CheckError { run_id, .. }
            | HubMessage::CheckComplete { run_id } => run_id,
        }
    }

    /// Returns true for `check-error` and `check-complete`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, HubMessage::CheckResult { .. })
    }
}
