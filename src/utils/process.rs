//! Process execution utilities
//!
//! Provides process execution with proper error handling and logging, plus a
//! single-slot bounded worker that enforces a wall-clock timeout on one child.

use crate::error::{DispatchError, Result};
use crate::utils::interrupt::Interrupt;
use std::process::{Command, Output, Stdio};
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, info, instrument, warn};

/// Utility for running external processes
#[derive(Debug)]
pub struct ProcessRunner {
    debug: bool,
}

/// Result of a process execution
#[derive(Debug)]
pub struct ProcessResult {
    /// Exit status code
    pub exit_code: Option<i32>,
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
    /// Whether the process was successful
    pub success: bool,
}

impl ProcessResult {
    fn from_output(output: &Output) -> Self {
        Self {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
        }
    }
}

/// How a bounded process run ended
#[derive(Debug)]
pub enum BoundedOutcome {
    /// The process exited on its own, successfully or not
    Completed(ProcessResult),
    /// The timeout fired and the process was killed
    TimedOut,
    /// The user interrupted and the process was killed
    Interrupted,
}

/// Build the single-slot runtime used to await a child with a deadline.
///
/// Returns `None` when no runtime can be created; callers then run the work
/// synchronously and lose the timeout guarantee.
pub(crate) fn bounded_runtime() -> Option<Runtime> {
    match Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => Some(runtime),
        Err(e) => {
            warn!(
                "Bounded execution unavailable ({}), continuing without a timeout",
                e
            );
            None
        }
    }
}

impl ProcessRunner {
    /// Create a new process runner
    #[must_use]
    pub const fn new(debug: bool) -> Self {
        Self { debug }
    }

    fn describe(command: &str, args: &[&str]) -> String {
        format!("{} {}", command, args.join(" "))
    }

    fn log_start(&self, cmd_str: &str) {
        if self.debug {
            debug!("Running command: {}", cmd_str);
        } else {
            info!("+ {}", cmd_str);
        }
    }

    /// Run a command, capture its output and keep non-zero exits as data
    fn capture(
        &self,
        command: &str,
        args: &[&str],
        env_vars: &[(String, String)],
    ) -> Result<ProcessResult> {
        let cmd_str = Self::describe(command, args);
        debug!("Running command with output capture: {}", cmd_str);

        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        for (key, value) in env_vars {
            cmd.env(key, value);
        }

        let output = cmd.output().map_err(|e| {
            DispatchError::process(
                cmd_str.clone(),
                None,
                String::new(),
                format!("Failed to execute command: {e}"),
            )
        })?;

        let result = ProcessResult::from_output(&output);
        debug!(
            "Command finished: success={}, exit_code={:?}, stdout_len={}, stderr_len={}",
            result.success,
            result.exit_code,
            result.stdout.len(),
            result.stderr.len()
        );
        Ok(result)
    }

    /// Run a command and capture its output
    #[instrument(skip(self))]
    pub fn run_command_with_output(&self, command: &str, args: &[&str]) -> Result<ProcessResult> {
        self.run_command_with_output_and_env(command, args, &[])
    }

    /// Run a command with environment variables and capture output
    #[instrument(skip(self, env_vars))]
    pub fn run_command_with_output_and_env(
        &self,
        command: &str,
        args: &[&str],
        env_vars: &[(String, String)],
    ) -> Result<ProcessResult> {
        let result = self.capture(command, args, env_vars)?;

        if !result.success {
            debug!("Command stderr: {}", result.stderr);
            return Err(DispatchError::process(
                Self::describe(command, args),
                result.exit_code,
                result.stdout,
                result.stderr,
            ));
        }

        Ok(result)
    }

    /// Run a command under a wall-clock timeout, capturing its output.
    ///
    /// The child is killed when the timeout fires or the user interrupts.
    #[instrument(skip(self, env_vars, interrupt))]
    pub fn run_bounded(
        &self,
        command: &str,
        args: &[&str],
        env_vars: &[(String, String)],
        timeout: Duration,
        interrupt: &Interrupt,
    ) -> Result<BoundedOutcome> {
        let cmd_str = Self::describe(command, args);
        self.log_start(&cmd_str);

        let Some(runtime) = bounded_runtime() else {
            return self
                .capture(command, args, env_vars)
                .map(BoundedOutcome::Completed);
        };

        runtime.block_on(Self::spawn_and_wait(
            &cmd_str, command, args, env_vars, timeout, interrupt,
        ))
    }

    async fn spawn_and_wait(
        cmd_str: &str,
        command: &str,
        args: &[&str],
        env_vars: &[(String, String)],
        timeout: Duration,
        interrupt: &Interrupt,
    ) -> Result<BoundedOutcome> {
        let mut cmd = tokio::process::Command::new(command);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for (key, value) in env_vars {
            cmd.env(key, value);
        }

        let child = cmd.spawn().map_err(|e| {
            DispatchError::process(
                cmd_str,
                None,
                String::new(),
                format!("Failed to execute command: {e}"),
            )
        })?;

        tokio::select! {
            output = child.wait_with_output() => {
                let output = output.map_err(|e| {
                    DispatchError::process(
                        cmd_str,
                        None,
                        String::new(),
                        format!("Failed to wait for command: {e}"),
                    )
                })?;
                Ok(BoundedOutcome::Completed(ProcessResult::from_output(&output)))
            }
            () = tokio::time::sleep(timeout) => {
                warn!("Command timed out after {}s: {}", timeout.as_secs(), cmd_str);
                Ok(BoundedOutcome::TimedOut)
            }
            () = interrupt.wait() => {
                warn!("Command interrupted: {}", cmd_str);
                Ok(BoundedOutcome::Interrupted)
            }
        }
    }

    /// Check if a command exists in PATH
    #[instrument(skip(self))]
    pub fn command_exists(&self, command: &str) -> bool {
        debug!("Checking if command exists: {}", command);

        let result = Command::new("which")
            .arg(command)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match result {
            Ok(status) => {
                let exists = status.success();
                debug!("Command '{}' exists: {}", command, exists);
                exists
            }
            Err(e) => {
                debug!("Failed to check if command '{}' exists: {}", command, e);
                false
            }
        }
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(false)
    }
}
