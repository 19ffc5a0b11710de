//! Medpred Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Network/HTTP
//! - Database
//! - Runtime specifics
//!
//! All types here represent the business domain of the medpred backend:
//! outlets ("medpreds"), their assigned products, and the check runs whose
//! results are pushed to real-time subscribers.

pub mod catalog;
pub mod error;
pub mod ids;
pub mod message;
pub mod status;

// Re-export commonly used types
pub use catalog::{AssignedProduct, Assignment, Medpred, ProductMatch};
pub use error::CoreError;
pub use ids::{ConnectionId, RunId};
pub use message::{CheckErrorPayload, HubMessage};
pub use status::RunState;
