//! Workbook upload handlers.
//!
//! Each upload is stored on disk and then handed to its import script. Unlike
//! check runs, the response waits for the script to exit.

use std::sync::Arc;

use axum::{
    extract::{multipart::MultipartRejection, Multipart, State},
    response::IntoResponse,
    Json,
};
use tracing::{debug, error, info};

use crate::http::error::ApiError;
use crate::http::responses::MessageResponse;
use crate::state::AppState;
use crate::storage::{StorageError, StoredFile};

/// Multipart field carrying the workbook.
const FILE_FIELD: &str = "file";

/// Mode argument telling the import script which sheet layout to expect.
const ASSORTMENT_PLAN_MODE: &str = "assortment_plan";

/// Upload and import an assortment plan workbook.
pub async fn upload_assortment_plan(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let stored = receive_workbook(&state, multipart).await?;
    let script = state.config.assortment_import_script.clone();
    run_import(
        &state,
        &script,
        vec![
            stored.path.display().to_string(),
            ASSORTMENT_PLAN_MODE.to_string(),
        ],
    )
    .await?;

    Ok(Json(MessageResponse::new(
        "Assortment plan uploaded and processed",
    )))
}

/// Upload and import an application (zayavka) workbook.
pub async fn upload_application(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let stored = receive_workbook(&state, multipart).await?;
    let script = state.config.application_import_script.clone();
    run_import(&state, &script, vec![stored.path.display().to_string()]).await?;

    Ok(Json(MessageResponse::new("Application uploaded and processed")))
}

/// Store the `file` field of a multipart body.
async fn receive_workbook(
    state: &AppState,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<StoredFile, ApiError> {
    let mut multipart = multipart.map_err(|e| {
        debug!(error = %e, "Upload without multipart body");
        ApiError::from(StorageError::MissingFile)
    })?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::from(StorageError::Read(e.to_string())))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let file_name = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(str::to_string);
        info!(file = %file_name, mime = ?content_type, "Receiving workbook");

        let stored = state
            .uploads
            .store(&file_name, content_type.as_deref(), field)
            .await?;
        return Ok(stored);
    }

    Err(StorageError::MissingFile.into())
}

/// Run an import script to completion.
async fn run_import(state: &AppState, script: &str, args: Vec<String>) -> Result<(), ApiError> {
    let command = state.script_command(script, args);
    info!(script, args = ?command.arg_list(), "Running import script");

    let process = command.spawn().map_err(|e| {
        error!(script, error = %e, "Failed to start import script");
        ApiError::ProcessingFailed
    })?;

    let outcome = process.wait().await.map_err(|e| {
        error!(script, error = %e, "Import script did not finish");
        ApiError::ProcessingFailed
    })?;

    if outcome.success() {
        info!(script, duration_ms = outcome.duration_ms, "Import script finished");
        Ok(())
    } else {
        error!(
            script,
            outcome = %outcome.describe(),
            stderr = %outcome.stderr,
            "Import script failed"
        );
        Err(ApiError::ProcessingFailed)
    }
}
