//! Error responses for the HTTP API.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::error;

use medpred_core::CoreError;

use crate::catalog::CatalogError;
use crate::http::responses::ErrorResponse;
use crate::storage::StorageError;

/// API error rendered as `{"error": "..."}`.
#[derive(Debug)]
pub enum ApiError {
    // Client errors (4xx)
    /// Request failed validation.
    BadRequest { message: String },
    /// Referenced record does not exist.
    NotFound { message: String },

    // Server errors (5xx)
    /// An import script failed.
    ProcessingFailed,
    /// Database or I/O failure; details are logged, not returned.
    Internal { message: String },
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::Internal {
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest { message } => (StatusCode::BAD_REQUEST, message),
            ApiError::NotFound { message } => (StatusCode::NOT_FOUND, message),
            ApiError::ProcessingFailed => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to process file".to_string(),
            ),
            ApiError::Internal { message } => {
                error!(error = %message, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::NotFound(_) => ApiError::NotFound {
                message: err.to_string(),
            },
            CatalogError::Conflict(message) => ApiError::BadRequest { message },
            CatalogError::Database(e) => ApiError::internal(e.to_string()),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        if err.is_client_error() {
            ApiError::bad_request(err.to_string())
        } else {
            ApiError::internal(err.to_string())
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidInput(message) => ApiError::BadRequest { message },
            other => ApiError::internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let cases = [
            (ApiError::bad_request("x"), StatusCode::BAD_REQUEST),
            (
                ApiError::from(CatalogError::NotFound("Medpred")),
                StatusCode::NOT_FOUND,
            ),
            (
                ApiError::from(CatalogError::Conflict("dup".into())),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::from(StorageError::TooLarge { limit: 1 }),
                StatusCode::BAD_REQUEST,
            ),
            (ApiError::ProcessingFailed, StatusCode::INTERNAL_SERVER_ERROR),
            (ApiError::internal("db down"), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[test]
    fn test_not_found_message() {
        match ApiError::from(CatalogError::NotFound("Assignment")) {
            ApiError::NotFound { message } => assert_eq!(message, "Assignment not found"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
