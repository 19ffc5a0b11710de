//! Report handlers.

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, Json};

use crate::http::error::ApiError;
use crate::state::AppState;

/// Assigned products joined with stock and sales per outlet.
pub async fn mp_zayavka_report(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.catalog.mp_zayavka_report().await?))
}

/// Assortment plan pivoted across the configured outlets.
pub async fn assortment_plan(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let rows = state
        .catalog
        .assortment_plan(&state.config.department_groups)
        .await?;
    Ok(Json(rows))
}

/// Suggested transfers between outlets.
pub async fn transfer_suggestions(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.catalog.transfer_suggestions().await?))
}
