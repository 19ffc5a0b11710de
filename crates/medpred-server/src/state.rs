//! Shared application state.

use std::sync::Arc;

use medpred_runner::WorkerCommand;

use crate::catalog::Catalog;
use crate::config::Config;
use crate::hub::BroadcastHub;
use crate::metrics::RunStats;
use crate::storage::UploadStore;

/// Shared application state.
pub struct AppState {
    /// Server configuration.
    pub config: Arc<Config>,

    /// Connected real-time clients.
    pub hub: Arc<BroadcastHub>,

    /// Check run counters.
    pub run_stats: Arc<RunStats>,

    /// Database access.
    pub catalog: Arc<dyn Catalog>,

    /// Where uploaded workbooks land.
    pub uploads: UploadStore,
}

impl AppState {
    /// Create a new AppState wrapped in Arc.
    pub fn new(config: Config, catalog: Arc<dyn Catalog>) -> Arc<Self> {
        let uploads = UploadStore::new(
            config.uploads_dir().to_path_buf(),
            config.allowed_mime_types.clone(),
            config.max_upload_bytes,
        );
        Arc::new(Self {
            hub: Arc::new(BroadcastHub::new(config.client_queue_capacity)),
            run_stats: Arc::new(RunStats::default()),
            config: Arc::new(config),
            catalog,
            uploads,
        })
    }

    /// Interpreter invocation of `script` followed by `args`.
    pub fn script_command<I, S>(&self, script: &str, args: I) -> WorkerCommand
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        WorkerCommand::new(self.config.python_path.clone())
            .arg(self.config.script_path(script).display().to_string())
            .args(args)
    }
}
