//! External worker execution for the medpred backend.
//!
//! This crate launches worker scripts as OS child processes and turns their
//! stdout into a stream of JSON events, one per newline-terminated line.
//!
//! # Example
//!
//! ```rust,no_run
//! use medpred_runner::WorkerCommand;
//!
//! async fn run_check() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut process = WorkerCommand::new("venv/bin/python3")
//!         .arg("CheckZayavka.py")
//!         .spawn()?;
//!
//!     if let Some(mut events) = process.events() {
//!         while let Some(event) = events.next_event().await? {
//!             println!("event: {}", event);
//!         }
//!     }
//!
//!     let outcome = process.wait().await?;
//!     println!("exit: {}", outcome.describe());
//!     Ok(())
//! }
//! ```

mod error;
mod parser;
mod process;

pub use error::RunnerError;
pub use parser::{EventParser, EventStream};
pub use process::{ExitOutcome, RunningProcess, WorkerCommand};
