//! Medpred backend server.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use medpred_server::config::{default_department_groups, megabytes_to_bytes, ConfigError};
use medpred_server::{http, AppState, Config, PgCatalog};

/// Medpred backend server.
#[derive(Parser, Debug)]
#[command(name = "medpred-server", about = "Medpred backend: REST API, uploads, and check streaming")]
struct Args {
    /// HTTP server address
    #[arg(long, default_value = "0.0.0.0:4000")]
    http_addr: String,

    /// PostgreSQL connection URL
    #[arg(long, env = "DATABASE_URL", default_value = "postgres://postgres@localhost:5433/postgres")]
    database_url: String,

    /// Maximum pooled database connections
    #[arg(long, default_value = "5")]
    db_max_connections: u32,

    /// Interpreter used to run the worker scripts
    #[arg(long, default_value = "venv/bin/python3")]
    python: PathBuf,

    /// Directory containing the worker scripts
    #[arg(long, default_value = ".")]
    scripts_dir: PathBuf,

    /// Directory uploaded workbooks are written to
    #[arg(long, default_value = "uploads")]
    uploads_dir: PathBuf,

    /// Largest accepted upload in megabytes
    #[arg(long, default_value = "40")]
    max_upload_mb: u64,

    /// Outlet included in the assortment-plan report (repeatable)
    #[arg(long = "department-group")]
    department_groups: Vec<String>,

    /// Messages buffered per real-time client before dropping
    #[arg(long, default_value = "256")]
    client_queue_capacity: usize,
}

impl Args {
    fn into_config(self) -> Result<Config, ConfigError> {
        let department_groups = if self.department_groups.is_empty() {
            default_department_groups()
        } else {
            self.department_groups
        };

        Ok(Config {
            http_bind_addr: self.http_addr,
            database_url: self.database_url,
            db_max_connections: self.db_max_connections,
            python_path: self.python,
            scripts_dir: self.scripts_dir,
            uploads_dir: self.uploads_dir,
            max_upload_bytes: megabytes_to_bytes(self.max_upload_mb)?,
            department_groups,
            client_queue_capacity: self.client_queue_capacity,
            ..Config::default()
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("medpred=info".parse()?))
        .with_target(true)
        .init();

    let config = Args::parse().into_config()?;
    config.validate()?;
    let http_addr: SocketAddr = config.http_bind_addr.parse()?;

    let catalog = PgCatalog::connect(&config.database_url, config.db_max_connections).await?;
    let state = AppState::new(config, Arc::new(catalog));
    state.uploads.ensure_dir().await?;

    info!(
        http_addr = %http_addr,
        python = %state.config.python_path.display(),
        uploads_dir = %state.uploads.dir().display(),
        "Starting medpred server"
    );

    let router = http::create_router(state);
    let listener = TcpListener::bind(http_addr).await?;
    info!("HTTP server listening on {}", http_addr);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_limit_overflow_is_rejected() {
        let args = Args::parse_from(["medpred-server", "--max-upload-mb", "18446744073709551615"]);
        assert!(matches!(args.into_config(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_upload_limit_in_bytes() {
        let config = Args::parse_from(["medpred-server", "--max-upload-mb", "2"])
            .into_config()
            .unwrap();
        assert_eq!(config.max_upload_bytes, 2 * 1024 * 1024);
        assert_eq!(config.department_groups, default_department_groups());
    }
}
