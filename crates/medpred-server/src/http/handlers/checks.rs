//! Check run trigger.

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, Json};
use tracing::info;

use crate::coordinator::RunCoordinator;
use crate::http::responses::CheckStartedResponse;
use crate::state::AppState;

/// Start a check run and acknowledge immediately.
///
/// Results arrive on the real-time channels tagged with the returned `run_id`.
pub async fn run_check_zayavka(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let script = &state.config.check_script;
    let command = state.script_command(script, std::iter::empty::<String>());

    let (run_id, _handle) = RunCoordinator::new(command, state.hub.clone(), state.run_stats.clone())
        .with_label(script.clone())
        .launch();
    info!(run_id = %run_id, script = %script, "Check run triggered");

    Json(CheckStartedResponse {
        message: "check started".to_string(),
        run_id,
    })
}
