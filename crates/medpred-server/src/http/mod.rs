//! HTTP server for the medpred backend.
//!
//! Provides endpoints for:
//! - Medpred and product assignment API (`/api/medpreds`, `/api/medpred-products`, `/api/products`)
//! - Workbook imports (`/api/upload-assortment-plan`, `/api/upload-application`)
//! - Check runs (`/api/run-check-zayavka`)
//! - Reports (`/api/mpzayavka`, `/api/assortment-plan`, `/api/transfers`)
//! - Real-time check stream (`/ws`, `/api/events`)
//! - Health check (`/health`)
//! - Prometheus metrics (`/metrics`)

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub mod error;
mod handlers;
pub mod responses;

/// Create the HTTP router.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Upload size is enforced while streaming to disk.
    let uploads = Router::new()
        .route(
            "/api/upload-assortment-plan",
            post(handlers::upload_assortment_plan),
        )
        .route("/api/upload-application", post(handlers::upload_application))
        .layer(DefaultBodyLimit::disable());

    Router::new()
        // Catalog routes
        .route("/api/medpreds", get(handlers::list_medpreds))
        .route("/api/medpreds/:id/products", get(handlers::medpred_products))
        .route("/api/products", get(handlers::search_products))
        .route(
            "/api/medpred-products",
            post(handlers::assign_product).delete(handlers::unassign_product),
        )
        // Report routes
        .route("/api/mpzayavka", get(handlers::mp_zayavka_report))
        .route("/api/assortment-plan", get(handlers::assortment_plan))
        .route("/api/transfers", get(handlers::transfer_suggestions))
        // Check runs and their real-time stream
        .route("/api/run-check-zayavka", post(handlers::run_check_zayavka))
        .route("/ws", get(handlers::ws_handler))
        .route("/api/events", get(handlers::sse_handler))
        // Observability routes
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_handler))
        .merge(uploads)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
