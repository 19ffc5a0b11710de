//! Prometheus metrics collection and formatting.
//!
//! This module provides metrics in Prometheus text exposition format.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use medpred_core::RunState;

use crate::state::AppState;

/// Counters for check runs.
#[derive(Debug, Default)]
pub struct RunStats {
    started: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl RunStats {
    /// Record a run leaving `Idle`.
    pub fn run_started(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a run reaching a terminal state.
    pub fn run_finished(&self, state: RunState) {
        match state {
            RunState::Completed => self.completed.fetch_add(1, Ordering::Relaxed),
            RunState::Failed => self.failed.fetch_add(1, Ordering::Relaxed),
            _ => return,
        };
    }

    pub fn started(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Runs started but not yet terminal.
    pub fn active(&self) -> u64 {
        self.started()
            .saturating_sub(self.completed() + self.failed())
    }
}

/// Collect all metrics from AppState and format as Prometheus text.
pub async fn collect_metrics(state: &Arc<AppState>) -> String {
    let mut output = String::new();

    collect_client_metrics(state, &mut output).await;
    collect_run_metrics(&state.run_stats, &mut output);

    output
}

/// Real-time subscriber metrics.
async fn collect_client_metrics(state: &Arc<AppState>, output: &mut String) {
    let clients = state.hub.client_count().await;
    let dropped = state.hub.dropped_count();

    writeln!(
        output,
        "# HELP medpred_realtime_clients Number of connected real-time clients"
    )
    .ok();
    writeln!(output, "# TYPE medpred_realtime_clients gauge").ok();
    writeln!(output, "medpred_realtime_clients {clients}").ok();
    writeln!(
        output,
        "# HELP medpred_realtime_dropped_total Messages dropped for slow clients"
    )
    .ok();
    writeln!(output, "# TYPE medpred_realtime_dropped_total counter").ok();
    writeln!(output, "medpred_realtime_dropped_total {dropped}").ok();
}

/// Check run metrics by outcome.
fn collect_run_metrics(stats: &RunStats, output: &mut String) {
    writeln!(output).ok();
    writeln!(
        output,
        "# HELP medpred_check_runs_total Check runs by terminal state"
    )
    .ok();
    writeln!(output, "# TYPE medpred_check_runs_total counter").ok();
    writeln!(
        output,
        "medpred_check_runs_total{{state=\"completed\"}} {}",
        stats.completed()
    )
    .ok();
    writeln!(
        output,
        "medpred_check_runs_total{{state=\"failed\"}} {}",
        stats.failed()
    )
    .ok();
    writeln!(output, "# HELP medpred_check_runs_active Check runs in progress").ok();
    writeln!(output, "# TYPE medpred_check_runs_active gauge").ok();
    writeln!(output, "medpred_check_runs_active {}", stats.active()).ok();
}
