//! # PaoPao Command Dispatcher
//!
//! A thin host that discovers plugin command scripts, runs them in an
//! isolated interpreter process and installs new ones from git repositories.
//!
//! ## Features
//!
//! - Discovery of built-in and community commands with an mtime-checked
//!   metadata cache
//! - Git install, update and uninstall under a per-command lock, with
//!   rollback of failed installs
//! - Advisory URL and script content checks before install and run
//! - Load and run timeouts for plugin execution
//!
//! ## Example
//!
//! ```no_run
//! use ppc_dispatcher::{config::Config, core::Discovery};
//!
//! let config = Config::with_home("/tmp/ppc");
//! for (name, record) in Discovery::new(config).discover(true) {
//!     println!("{name}: {} ({})", record.description, record.source);
//! }
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod utils;

use anyhow::Result;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize logging with appropriate verbosity.
///
/// Logs go to stderr; stdout belongs to listings and plugin output.
pub fn setup_logging(debug: bool) -> Result<()> {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_level(true)
                .compact(),
        )
        .with(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}
