//! Git operations used by install and update
//!
//! Network operations (clone, fetch) run through the bounded worker so a
//! stalled remote cannot hang the CLI. Local queries run directly.

use crate::error::{DispatchError, Result};
use crate::utils::interrupt::Interrupt;
use crate::utils::process::{BoundedOutcome, ProcessResult, ProcessRunner};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, instrument};

/// Upstream of the checked-out branch, as set up by `git clone`
pub const UPSTREAM: &str = "@{upstream}";

/// Thin wrapper over the git executable
#[derive(Debug)]
pub struct GitClient {
    binary: String,
    runner: ProcessRunner,
}

impl GitClient {
    pub fn new(binary: impl Into<String>, debug: bool) -> Self {
        Self {
            binary: binary.into(),
            runner: ProcessRunner::new(debug),
        }
    }

    /// Never let git stop and wait for credentials on the terminal
    fn env() -> Vec<(String, String)> {
        vec![("GIT_TERMINAL_PROMPT".to_string(), "0".to_string())]
    }

    fn bounded(&self, args: &[&str], timeout: Duration, interrupt: &Interrupt) -> Result<ProcessResult> {
        let outcome = self
            .runner
            .run_bounded(&self.binary, args, &Self::env(), timeout, interrupt)?;

        match outcome {
            BoundedOutcome::Completed(result) if result.success => Ok(result),
            BoundedOutcome::Completed(result) => Err(DispatchError::process(
                format!("{} {}", self.binary, args.join(" ")),
                result.exit_code,
                result.stdout,
                result.stderr,
            )),
            BoundedOutcome::TimedOut => Err(DispatchError::process_timeout(
                format!("{} {}", self.binary, args.first().copied().unwrap_or_default()),
                timeout,
            )),
            BoundedOutcome::Interrupted => Err(DispatchError::Interrupted),
        }
    }

    fn local(&self, dir: &Path, args: &[&str]) -> Result<ProcessResult> {
        let dir = dir.to_string_lossy();
        let mut full_args = vec!["-C", &*dir];
        full_args.extend_from_slice(args);
        self.runner
            .run_command_with_output_and_env(&self.binary, &full_args, &Self::env())
    }

    /// Clone `url` into `target`. `shallow` limits history to the tip commit.
    #[instrument(skip(self, interrupt))]
    pub fn clone_repo(
        &self,
        url: &str,
        target: &Path,
        shallow: bool,
        branch: Option<&str>,
        timeout: Duration,
        interrupt: &Interrupt,
    ) -> Result<()> {
        let target = target.to_string_lossy();
        let mut args = vec!["clone"];
        if shallow {
            args.extend(["--depth", "1"]);
        }
        if let Some(branch) = branch {
            args.extend(["--branch", branch]);
        }
        args.extend(["--", url, &*target]);

        self.bounded(&args, timeout, interrupt)?;
        debug!("Cloned {} into {}", url, target);
        Ok(())
    }

    /// Fetch from `origin`
    #[instrument(skip(self, interrupt))]
    pub fn fetch(
        &self,
        dir: &Path,
        shallow: bool,
        timeout: Duration,
        interrupt: &Interrupt,
    ) -> Result<()> {
        let dir = dir.to_string_lossy();
        let mut args = vec!["-C", &*dir, "fetch", "origin"];
        if shallow {
            args.extend(["--depth", "1"]);
        }
        self.bounded(&args, timeout, interrupt)?;
        Ok(())
    }

    /// Number of commits on `reference` that HEAD does not have
    #[instrument(skip(self))]
    pub fn commits_behind(&self, dir: &Path, reference: &str) -> Result<u64> {
        let range = format!("HEAD..{reference}");
        let result = self.local(dir, &["rev-list", "--count", &range])?;

        result.stdout.trim().parse().map_err(|e| {
            DispatchError::validation(format!(
                "Unexpected rev-list output '{}': {e}",
                result.stdout.trim()
            ))
        })
    }

    /// Move HEAD, index and worktree to `reference`
    #[instrument(skip(self))]
    pub fn reset_hard(&self, dir: &Path, reference: &str) -> Result<()> {
        self.local(dir, &["reset", "--hard", reference])?;
        Ok(())
    }

    /// Commit id of HEAD
    pub fn head(&self, dir: &Path) -> Result<String> {
        Ok(self.local(dir, &["rev-parse", "HEAD"])?.stdout.trim().to_string())
    }

    /// `git --version` output
    pub fn version(&self) -> Result<String> {
        let result = self
            .runner
            .run_command_with_output_and_env(&self.binary, &["--version"], &Self::env())?;
        Ok(result.stdout.trim().to_string())
    }
}
