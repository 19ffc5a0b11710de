//! Server configuration.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// MIME type of `.xlsx` workbooks.
pub const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// MIME type of legacy `.xls` workbooks.
pub const XLS_MIME: &str = "application/vnd.ms-excel";

/// Outlets pivoted by the assortment-plan report unless configured otherwise.
pub fn default_department_groups() -> Vec<String> {
    ["А. Бокейхана 32", "Асфендиярова 2", "Жумабаева 3", "Пушкина 1"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Configuration errors detected at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Python interpreter not found at '{0}'")]
    InterpreterNotFound(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server bind address.
    pub http_bind_addr: String,

    /// PostgreSQL connection URL.
    pub database_url: String,

    /// Maximum pooled database connections.
    pub db_max_connections: u32,

    /// Interpreter used to run every worker script.
    pub python_path: PathBuf,

    /// Directory containing the worker scripts. Workers inherit the server's
    /// working directory.
    pub scripts_dir: PathBuf,

    /// Script streaming check results as JSON lines.
    pub check_script: String,

    /// Script importing an assortment plan workbook.
    pub assortment_import_script: String,

    /// Script importing an application (zayavka) workbook.
    pub application_import_script: String,

    /// Where uploaded workbooks are stored.
    pub uploads_dir: PathBuf,

    /// Largest accepted upload in bytes.
    pub max_upload_bytes: u64,

    /// Accepted upload MIME types.
    pub allowed_mime_types: Vec<String>,

    /// Outlets pivoted by the assortment-plan report.
    pub department_groups: Vec<String>,

    /// Per-subscriber queue length before messages to that subscriber are dropped.
    pub client_queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_bind_addr: "0.0.0.0:4000".to_string(),
            database_url: "postgres://postgres@localhost:5433/postgres".to_string(),
            db_max_connections: 5,
            python_path: PathBuf::from("venv/bin/python3"),
            scripts_dir: PathBuf::from("."),
            check_script: "CheckZayavka.py".to_string(),
            assortment_import_script: "upload_data.py".to_string(),
            application_import_script: "upload_zayavka.py".to_string(),
            uploads_dir: PathBuf::from("uploads"),
            max_upload_bytes: 40 * 1024 * 1024,
            allowed_mime_types: vec![XLSX_MIME.to_string(), XLS_MIME.to_string()],
            department_groups: default_department_groups(),
            client_queue_capacity: 256,
        }
    }
}

/// Convert a megabyte limit to bytes, rejecting values that overflow.
pub fn megabytes_to_bytes(megabytes: u64) -> Result<u64, ConfigError> {
    megabytes
        .checked_mul(1024 * 1024)
        .ok_or_else(|| ConfigError::Invalid(format!("upload limit of {} MB is too large", megabytes)))
}

impl Config {
    /// Check settings that would otherwise fail at the first request.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.python_path.exists() {
            return Err(ConfigError::InterpreterNotFound(
                self.python_path.display().to_string(),
            ));
        }
        if self.department_groups.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one department group is required".to_string(),
            ));
        }
        if self.client_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "client queue capacity must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Path of a worker script inside the scripts directory.
    pub fn script_path(&self, script: &str) -> PathBuf {
        self.scripts_dir.join(script)
    }

    /// Directory uploads are written to.
    pub fn uploads_dir(&self) -> &Path {
        &self.uploads_dir
    }
}
