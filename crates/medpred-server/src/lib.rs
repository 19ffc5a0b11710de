//! Medpred Server Library
//!
//! HTTP backend for the medpred system: catalog and report queries, workbook
//! uploads, and check runs whose worker output is streamed to real-time
//! clients as it is produced.

pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod http;
pub mod hub;
pub mod metrics;
pub mod state;
pub mod storage;

pub use catalog::{Catalog, CatalogError, PgCatalog};
pub use config::Config;
pub use coordinator::RunCoordinator;
pub use hub::{BroadcastHub, Subscription};
pub use state::AppState;
pub use storage::{StorageError, StoredFile, UploadStore};
