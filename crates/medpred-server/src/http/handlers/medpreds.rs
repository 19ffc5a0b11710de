//! Medpred and product assignment handlers.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use tracing::info;

use medpred_core::Assignment;

use crate::http::error::ApiError;
use crate::http::responses::{MessageResponse, SearchQuery};
use crate::state::AppState;

/// List all medpreds.
pub async fn list_medpreds(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let medpreds = state.catalog.list_medpreds().await?;
    Ok(Json(medpreds))
}

/// Products assigned to one medpred.
pub async fn medpred_products(
    State(state): State<Arc<AppState>>,
    Path(medpred_id): Path<i32>,
) -> Result<impl IntoResponse, ApiError> {
    let products = state.catalog.medpred_products(medpred_id).await?;
    Ok(Json(products))
}

/// Product name search for autocomplete.
pub async fn search_products(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let term = query.search.unwrap_or_default();
    let products = state.catalog.search_products(&term).await?;
    Ok(Json(products))
}

/// Assign a product to a medpred.
pub async fn assign_product(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Assignment>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(assignment) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let (medpred_id, product_name) = assignment.require()?;

    state.catalog.assign_product(medpred_id, product_name).await?;
    info!(medpred_id, product_name, "Product assigned to medpred");

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse::new("Product assigned to medpred")),
    ))
}

/// Remove a product from a medpred.
pub async fn unassign_product(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Assignment>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(assignment) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let (medpred_id, product_name) = assignment.require()?;

    state.catalog.unassign_product(medpred_id, product_name).await?;
    info!(medpred_id, product_name, "Product unassigned from medpred");

    Ok(Json(MessageResponse::new("Product unassigned from medpred")))
}
