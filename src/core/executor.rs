//! Plugin loading and execution
//!
//! Each command runs in its own interpreter process started as
//! `<interpreter> -c <bootstrap> <mode> <status-file> <name> <script> <args...>`.
//! The bootstrap imports the script as a fresh module, checks for a
//! `main(argv)` entry point, calls it and appends its progress to the status
//! file as JSON lines:
//!
//! | phase           | meaning                                  |
//! |-----------------|------------------------------------------|
//! | `load_failed`   | the script could not be imported         |
//! | `missing_entry` | imported, but no usable `main(argv)`     |
//! | `loaded`        | entry point verified, about to be called |
//! | `early_exit`    | `main` requested an exit with a code     |
//! | `fault`         | `main` raised                            |
//! | `ok`            | `main` returned                          |
//!
//! The host allows the load timeout until `loaded` shows up, then the run
//! timeout. Plugin stdio is the host's own terminal.

use crate::config::RuntimeConfig;
use crate::error::{DispatchError, Result};
use crate::utils::interrupt::Interrupt;
use crate::utils::process::bounded_runtime;
use serde::Deserialize;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

const STATUS_POLL: Duration = Duration::from_millis(50);

const BOOTSTRAP: &str = r##"
import importlib.util, inspect, json, os, sys, traceback

mode, status_path, name, script = sys.argv[1:5]
argv = sys.argv[5:]

def report(phase, **fields):
    fields["phase"] = phase
    with open(status_path, "a", encoding="utf-8") as fh:
        fh.write(json.dumps(fields) + "\n")

def exit_code(exc):
    code = exc.code
    if code is None:
        return 0
    if isinstance(code, int):
        return code
    print(code, file=sys.stderr)
    return 1

sys.argv = [script] + argv
sys.path.insert(0, os.path.dirname(os.path.abspath(script)))
try:
    spec = importlib.util.spec_from_file_location("ppc_command_" + name, script)
    if spec is None or spec.loader is None:
        raise ImportError("cannot create a module from " + script)
    module = importlib.util.module_from_spec(spec)
    spec.loader.exec_module(module)
except SystemExit as exc:
    report("load_failed", message="exited with status %d while loading" % exit_code(exc))
    sys.exit(1)
except BaseException as exc:
    report("load_failed", message="%s: %s" % (type(exc).__name__, exc))
    sys.exit(1)

entry = getattr(module, "main", None)
if not callable(entry):
    report("missing_entry", message="no callable main() function")
    sys.exit(1)
try:
    params = inspect.signature(entry).parameters
except (TypeError, ValueError):
    params = None
if params is not None and len(params) != 1:
    report("missing_entry", message="main() must accept exactly one parameter (argv list)")
    sys.exit(1)

report("loaded")
if mode == "probe":
    sys.exit(0)

try:
    entry(argv)
except SystemExit as exc:
    code = exit_code(exc)
    report("early_exit", code=code)
    sys.exit(code)
except KeyboardInterrupt:
    report("fault", message="KeyboardInterrupt")
    sys.exit(130)
except BaseException as exc:
    traceback.print_exc()
    report("fault", message="%s: %s" % (type(exc).__name__, exc))
    sys.exit(1)
report("ok")
"##;

/// How a plugin's `main` finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// `main` returned normally
    Success,
    /// `main` asked to exit with this status
    EarlyExit(i32),
    /// `main` raised; the message names the error
    Fault(String),
}

/// One status-file line
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
enum Phase {
    LoadFailed { message: String },
    MissingEntry { message: String },
    Loaded,
    EarlyExit { code: i32 },
    Fault { message: String },
    Ok,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Run,
    Probe,
}

impl Mode {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Run => "run",
            Self::Probe => "probe",
        }
    }
}

/// How the plugin process ended, before its status is interpreted
#[derive(Debug)]
enum Exit {
    Code(Option<i32>),
    LoadTimedOut,
    RunTimedOut(Duration),
    Interrupted,
}

/// Loads and runs plugin scripts
#[derive(Debug, Clone)]
pub struct Executor {
    runtime: RuntimeConfig,
    interrupt: Interrupt,
}

impl Executor {
    pub fn new(runtime: RuntimeConfig, interrupt: Interrupt) -> Self {
        Self { runtime, interrupt }
    }

    /// Load `script` and call its `main` with `args`.
    ///
    /// Load problems and timeouts are errors; whatever `main` itself did is
    /// an [`Invocation`].
    #[instrument(skip(self, args))]
    pub fn execute(
        &self,
        name: &str,
        script: &Path,
        args: &[String],
        run_timeout: Option<Duration>,
    ) -> Result<Invocation> {
        self.launch(Mode::Run, name, script, args, run_timeout)
    }

    /// Load `script` and verify its entry point without calling it
    #[instrument(skip(self))]
    pub fn probe(&self, name: &str, script: &Path) -> Result<()> {
        self.launch(Mode::Probe, name, script, &[], None).map(|_| ())
    }

    fn launch(
        &self,
        mode: Mode,
        name: &str,
        script: &Path,
        args: &[String],
        run_timeout: Option<Duration>,
    ) -> Result<Invocation> {
        let status_file = tempfile::Builder::new()
            .prefix("ppc-status-")
            .tempfile()
            .map_err(|e| DispatchError::file_system("create status file", std::env::temp_dir(), e))?;
        let status_path = status_file.path();

        let mut cmd = Command::new(&self.runtime.interpreter);
        cmd.arg("-c")
            .arg(BOOTSTRAP)
            .arg(mode.as_str())
            .arg(status_path)
            .arg(name)
            .arg(script)
            .args(args);

        if mode == Mode::Probe {
            cmd.stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null());
        }

        debug!(
            "Launching {} via {} ({:?})",
            script.display(),
            self.runtime.interpreter,
            mode
        );

        let exit = match bounded_runtime() {
            Some(runtime) => runtime.block_on(self.supervise(cmd, name, status_path, run_timeout))?,
            None => {
                let status = cmd.status().map_err(|e| self.spawn_error(name, &e))?;
                Exit::Code(status.code())
            }
        };

        match exit {
            Exit::LoadTimedOut => Err(DispatchError::LoadTimeout {
                name: name.to_string(),
                timeout: self.runtime.load_timeout,
            }),
            Exit::RunTimedOut(timeout) => Err(DispatchError::RunTimeout {
                name: name.to_string(),
                timeout,
            }),
            Exit::Interrupted => Err(DispatchError::Interrupted),
            Exit::Code(_) if self.interrupt.is_set() => Err(DispatchError::Interrupted),
            Exit::Code(code) => interpret(name, &read_phases(status_path), code),
        }
    }

    fn spawn_error(&self, name: &str, e: &std::io::Error) -> DispatchError {
        DispatchError::LoadFailed {
            name: name.to_string(),
            message: format!("cannot start interpreter '{}': {e}", self.runtime.interpreter),
        }
    }

    /// Wait for the plugin, enforcing the load timeout until it reports
    /// `loaded` and the run timeout afterwards
    async fn supervise(
        &self,
        cmd: Command,
        name: &str,
        status_path: &Path,
        run_timeout: Option<Duration>,
    ) -> Result<Exit> {
        let mut cmd = tokio::process::Command::from(cmd);
        cmd.kill_on_drop(true);
        let mut child = cmd.spawn().map_err(|e| self.spawn_error(name, &e))?;

        let started = Instant::now();
        let mut loaded_at: Option<Instant> = None;

        loop {
            if loaded_at.is_none() && read_phases(status_path).contains(&Phase::Loaded) {
                debug!("'{}' loaded in {:?}", name, started.elapsed());
                loaded_at = Some(Instant::now());
            }

            let expired = match (loaded_at, run_timeout) {
                (None, _) if started.elapsed() >= self.runtime.load_timeout => Some(Exit::LoadTimedOut),
                (Some(at), Some(limit)) if at.elapsed() >= limit => Some(Exit::RunTimedOut(limit)),
                _ => None,
            };
            if let Some(exit) = expired {
                warn!("'{}' timed out, stopping it", name);
                if let Err(e) = child.kill().await {
                    warn!("Could not kill '{}': {}", name, e);
                }
                return Ok(exit);
            }

            tokio::select! {
                status = child.wait() => {
                    let status = status.map_err(|e| DispatchError::LoadFailed {
                        name: name.to_string(),
                        message: format!("cannot wait for interpreter: {e}"),
                    })?;
                    return Ok(Exit::Code(status.code()));
                }
                () = tokio::time::sleep(STATUS_POLL) => {}
                () = self.interrupt.wait() => {
                    if let Err(e) = child.kill().await {
                        warn!("Could not kill '{}': {}", name, e);
                    }
                    return Ok(Exit::Interrupted);
                }
            }
        }
    }
}

/// Phases reported so far; unreadable lines are skipped
fn read_phases(path: &Path) -> Vec<Phase> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    content
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect()
}

/// Turn the last reported phase and the exit status into the outcome
fn interpret(name: &str, phases: &[Phase], exit_code: Option<i32>) -> Result<Invocation> {
    match phases.last() {
        Some(Phase::Ok) => Ok(Invocation::Success),
        Some(Phase::EarlyExit { code }) => Ok(Invocation::EarlyExit(*code)),
        Some(Phase::Fault { message }) => Ok(Invocation::Fault(message.clone())),
        Some(Phase::MissingEntry { message }) => Err(DispatchError::MissingEntryPoint {
            name: name.to_string(),
            message: message.clone(),
        }),
        Some(Phase::LoadFailed { message }) => Err(DispatchError::LoadFailed {
            name: name.to_string(),
            message: message.clone(),
        }),
        // Probes stop here; a run that stops here left without unwinding
        Some(Phase::Loaded) => match exit_code {
            Some(0) => Ok(Invocation::Success),
            Some(code) => Ok(Invocation::EarlyExit(code)),
            None => Ok(Invocation::Fault("terminated by a signal".to_string())),
        },
        None => Err(DispatchError::LoadFailed {
            name: name.to_string(),
            message: match exit_code {
                Some(code) => format!("interpreter exited with status {code} before loading"),
                None => "interpreter terminated by a signal before loading".to_string(),
            },
        }),
    }
}
