//! HTTP request and response types.

use serde::{Deserialize, Serialize};

use medpred_core::RunId;

// ============================================================================
// Catalog types
// ============================================================================

/// Query string of the product search endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    /// Substring to look for; missing matches every product.
    #[serde(default)]
    pub search: Option<String>,
}

// ============================================================================
// Generic types
// ============================================================================

/// Acknowledgement with a human-readable message.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ============================================================================
// Check run types
// ============================================================================

/// Response of the check trigger.
#[derive(Debug, Serialize)]
pub struct CheckStartedResponse {
    pub message: String,

    /// Tag carried by every real-time message of this run.
    pub run_id: RunId,
}

/// Response of the health endpoint.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}
