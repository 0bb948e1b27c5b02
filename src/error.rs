//! Error types for the command dispatcher
//!
//! Provides structured error handling with context and proper error chains.
//! Every variant maps to a process exit status through [`DispatchError::exit_code`].

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the dispatcher
#[derive(Error, Debug)]
pub enum DispatchError {
    /// File system operation errors
    #[error("File system error: {operation} failed on {path}")]
    FileSystem {
        operation: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Process execution errors
    #[error("Process error: {command} failed{}", stderr_suffix(.stderr))]
    Process {
        command: String,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    /// A bounded external operation (clone, fetch) exceeded its wall-clock ceiling
    #[error("Process error: {command} timed out after {}s", .timeout.as_secs())]
    ProcessTimeout { command: String, timeout: Duration },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Validation errors
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// URL or script content rejected before install or run
    #[error("Security check failed: {reason}")]
    SecurityRejected { reason: String },

    /// Another operation holds the lock for the same target
    #[error(
        "Another operation on '{target}' is in progress. If no other ppc process is running, delete {}",
        .lock_path.display()
    )]
    LockContention { target: String, lock_path: PathBuf },

    /// Requested command is not in the command table
    #[error("Unknown command: {name}")]
    UnknownCommand { name: String },

    /// Command exists but was not installed from a repository
    #[error("Cannot update '{name}': not installed via git. Only commands installed with 'ppc install' can be updated")]
    NotInstalled { name: String },

    /// Plugin did not finish loading in time
    #[error("Timeout loading command '{name}' (>{}s)", .timeout.as_secs())]
    LoadTimeout { name: String, timeout: Duration },

    /// Plugin did not finish running in time
    #[error("Command '{name}' timed out (>{}s)", .timeout.as_secs())]
    RunTimeout { name: String, timeout: Duration },

    /// Plugin loaded but has no usable `main(argv)`
    #[error("Command '{name}' has no callable main(argv): {message}")]
    MissingEntryPoint { name: String, message: String },

    /// Plugin could not be loaded at all
    #[error("Could not load command '{name}': {message}")]
    LoadFailed { name: String, message: String },

    /// Plugin raised an uncaught error while running
    #[error("Error running command '{name}': {message}")]
    PluginFault { name: String, message: String },

    /// Plugin requested a non-zero exit; its own status is kept for reporting
    #[error("Command '{name}' exited with status {code}")]
    PluginExit { name: String, code: i32 },

    /// The user interrupted the operation
    #[error("Operation cancelled by user")]
    Interrupted,
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {trimmed}")
    }
}

impl DispatchError {
    /// Create a new file system error
    pub fn file_system<P: Into<PathBuf>>(
        operation: impl Into<String>,
        path: P,
        source: std::io::Error,
    ) -> Self {
        Self::FileSystem {
            operation: operation.into(),
            path: path.into(),
            source,
        }
    }

    /// Create a new process error
    pub fn process(
        command: impl Into<String>,
        exit_code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        Self::Process {
            command: command.into(),
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// Create a new process timeout error
    pub fn process_timeout(command: impl Into<String>, timeout: Duration) -> Self {
        Self::ProcessTimeout {
            command: command.into(),
            timeout,
        }
    }

    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a new security rejection
    pub fn security(reason: impl Into<String>) -> Self {
        Self::SecurityRejected {
            reason: reason.into(),
        }
    }

    /// Process exit status for this failure kind. Zero is never returned.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::UnknownCommand { .. } => 2,
            Self::LoadTimeout { .. } => 3,
            Self::RunTimeout { .. } => 4,
            Self::MissingEntryPoint { .. } => 5,
            Self::PluginFault { .. } => 6,
            Self::LoadFailed { .. } => 7,
            Self::SecurityRejected { .. } => 8,
            Self::LockContention { .. } => 9,
            Self::PluginExit { .. } => 10,
            Self::Interrupted => 130,
            Self::FileSystem { .. }
            | Self::Process { .. }
            | Self::ProcessTimeout { .. }
            | Self::Config { .. }
            | Self::Validation { .. }
            | Self::NotInstalled { .. } => 1,
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, DispatchError>;
