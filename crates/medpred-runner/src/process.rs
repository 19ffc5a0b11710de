//! Worker process lifecycle.
//!
//! This module provides [`WorkerCommand`] for launching an external worker
//! (usually a Python script) and [`RunningProcess`] for consuming its output
//! and collecting its exit outcome.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::RunnerError;
use crate::parser::EventStream;

/// Terminal outcome of a worker process, delivered once.
#[derive(Debug, Clone)]
pub struct ExitOutcome {
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,

    /// Terminating signal, if the process was killed (unix only).
    pub signal: Option<i32>,

    /// Everything the worker wrote to stderr, verbatim.
    pub stderr: String,

    /// When the worker was spawned.
    pub started_at: DateTime<Utc>,

    /// Wall-clock time from spawn to exit in milliseconds.
    pub duration_ms: u64,
}

impl ExitOutcome {
    /// Returns true if the worker exited with code 0.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Short description of how the worker ended.
    pub fn describe(&self) -> String {
        match (self.code, self.signal) {
            (Some(code), _) => format!("exited with code {}", code),
            (None, Some(signal)) => format!("killed by signal {}", signal),
            (None, None) => "terminated abnormally".to_string(),
        }
    }
}

/// Builder for launching a worker process.
///
/// # Example
///
/// ```rust,no_run
/// use medpred_runner::WorkerCommand;
///
/// async fn import(path: &str) -> Result<(), Box<dyn std::error::Error>> {
///     let outcome = WorkerCommand::new("venv/bin/python3")
///         .arg("upload_zayavka.py")
///         .arg(path)
///         .spawn()?
///         .wait()
///         .await?;
///     assert!(outcome.success());
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    /// Executable to launch.
    program: PathBuf,

    /// Arguments passed to the executable.
    args: Vec<String>,

    /// Working directory (inherited when unset).
    current_dir: Option<PathBuf>,

    /// Additional environment variables.
    env_vars: Vec<(String, String)>,
}

impl WorkerCommand {
    /// Create a command for the given executable.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            env_vars: Vec::new(),
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run the worker in the given directory.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Add an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }

    /// The executable path.
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// The argument list.
    pub fn arg_list(&self) -> &[String] {
        &self.args
    }

    /// Start the worker.
    ///
    /// Returns as soon as the OS process exists; output and exit are consumed
    /// through the returned [`RunningProcess`].
    pub fn spawn(&self) -> Result<RunningProcess, RunnerError> {
        let program = self.program.display().to_string();

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.env_vars {
            cmd.env(key, value);
        }

        debug!("Full command: {:?}", cmd);

        let mut child = cmd.spawn().map_err(|e| {
            error!(program = %program, error = %e, "Failed to spawn worker");
            RunnerError::Spawn {
                program: program.clone(),
                source: e,
            }
        })?;

        let pid = child.id();
        info!(program = %program, args = ?self.args, pid = ?pid, "Worker spawned");

        let stdout = child.stdout.take().ok_or(RunnerError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(RunnerError::MissingPipe("stderr"))?;

        let stderr_task = tokio::spawn(collect_stderr(stderr, program.clone()));

        Ok(RunningProcess {
            program,
            pid,
            started_at: Utc::now(),
            started: Instant::now(),
            child,
            stdout: Some(stdout),
            stderr_task,
        })
    }
}

/// A spawned worker.
pub struct RunningProcess {
    program: String,
    pid: Option<u32>,
    started_at: DateTime<Utc>,
    started: Instant,
    child: Child,
    stdout: Option<ChildStdout>,
    stderr_task: JoinHandle<String>,
}

impl RunningProcess {
    /// OS process id, if still known.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// When the worker was spawned.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Take stdout as a lazy stream of decoded JSON events.
    ///
    /// Returns `None` if stdout was already taken.
    pub fn events(&mut self) -> Option<EventStream<ChildStdout>> {
        self.stdout.take().map(EventStream::new)
    }

    /// Wait for the worker to exit and collect its outcome.
    ///
    /// Stdout that was never taken is drained and logged so the worker cannot
    /// block on a full pipe.
    pub async fn wait(mut self) -> Result<ExitOutcome, RunnerError> {
        if let Some(stdout) = self.stdout.take() {
            drain_stdout(stdout, &self.program).await;
        }

        let status = self.child.wait().await?;

        let stderr = match self.stderr_task.await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Worker stderr reader failed");
                String::new()
            }
        };

        let outcome = ExitOutcome {
            code: status.code(),
            signal: exit_signal(&status),
            stderr,
            started_at: self.started_at,
            duration_ms: self.started.elapsed().as_millis() as u64,
        };

        info!(
            program = %self.program,
            exit_code = ?outcome.code,
            signal = ?outcome.signal,
            duration_ms = outcome.duration_ms,
            success = outcome.success(),
            "Worker exited"
        );

        Ok(outcome)
    }
}

async fn collect_stderr<R: AsyncRead + Unpin>(stderr: R, program: String) -> String {
    let mut reader = BufReader::new(stderr);
    let mut collected = String::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&line);
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    warn!(program = %program, stderr = %trimmed, "Worker stderr");
                }
                collected.push_str(&text);
            }
            Err(e) => {
                error!(error = %e, "Error reading worker stderr");
                break;
            }
        }
    }
    collected
}

async fn drain_stdout(stdout: ChildStdout, program: &str) {
    let mut reader = BufReader::new(stdout);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&line);
                debug!(program = %program, stdout = %text.trim_end(), "Worker stdout");
            }
            Err(e) => {
                error!(error = %e, "Error reading worker stdout");
                break;
            }
        }
    }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serde_json::json;

    fn sh(script: &str) -> WorkerCommand {
        WorkerCommand::new("/bin/sh").arg("-c").arg(script)
    }

    #[test]
    fn test_command_builder() {
        let cmd = WorkerCommand::new("venv/bin/python3")
            .arg("upload_data.py")
            .args(["uploads/plan.xlsx", "assortment_plan"])
            .current_dir("/srv/medpred")
            .env("PYTHONUNBUFFERED", "1");

        assert_eq!(cmd.program(), Path::new("venv/bin/python3"));
        assert_eq!(
            cmd.arg_list(),
            ["upload_data.py", "uploads/plan.xlsx", "assortment_plan"]
        );
        assert_eq!(cmd.current_dir, Some(PathBuf::from("/srv/medpred")));
        assert_eq!(cmd.env_vars.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_executable_is_spawn_failure() {
        let err = WorkerCommand::new("/nonexistent/medpred-worker")
            .spawn()
            .err()
            .expect("spawn should fail");
        assert!(err.is_spawn_failure());
    }

    #[tokio::test]
    async fn test_events_then_success() {
        let mut process = sh(r#"printf '{"a":1}\n\n{"b":2}\n'"#).spawn().unwrap();

        let mut events = process.events().unwrap();
        let mut seen = Vec::new();
        while let Some(event) = events.next_event().await.unwrap() {
            seen.push(event);
        }
        assert_eq!(seen, vec![json!({"a": 1}), json!({"b": 2})]);
        assert!(process.events().is_none());

        let outcome = process.wait().await.unwrap();
        assert!(outcome.success());
        assert_eq!(outcome.describe(), "exited with code 0");
    }

    #[tokio::test]
    async fn test_nonzero_exit_keeps_stderr() {
        let process = sh("echo 'first problem' >&2; echo 'second problem' >&2; exit 3")
            .spawn()
            .unwrap();

        let outcome = process.wait().await.unwrap();
        assert!(!outcome.success());
        assert_eq!(outcome.code, Some(3));
        assert_eq!(outcome.stderr, "first problem\nsecond problem\n");
    }

    #[tokio::test]
    async fn test_killed_worker_reports_signal() {
        let process = sh("kill -9 $$").spawn().unwrap();

        let outcome = process.wait().await.unwrap();
        assert!(!outcome.success());
        assert_eq!(outcome.code, None);
        assert_eq!(outcome.signal, Some(9));
        assert_eq!(outcome.describe(), "killed by signal 9");
    }

    #[tokio::test]
    async fn test_wait_drains_untaken_stdout() {
        // More than a pipe buffer of output must not deadlock the wait.
        let process = sh("i=0; while [ $i -lt 5000 ]; do echo '{\"line\":\"padding padding padding\"}'; i=$((i+1)); done")
            .spawn()
            .unwrap();

        let outcome = process.wait().await.unwrap();
        assert!(outcome.success());
    }
}
