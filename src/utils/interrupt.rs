//! User interrupt tracking
//!
//! A Ctrl-C handler flips a shared flag instead of killing the process, so
//! long-running operations can stop their children and unwind normally.
//! Unwinding is what releases lock markers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Shared interrupt flag
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    flag: Arc<AtomicBool>,
}

impl Interrupt {
    /// Create a flag that is not connected to any signal
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a flag and register it as the process SIGINT handler.
    ///
    /// Failing to register is not fatal: the flag still works, Ctrl-C just
    /// falls back to terminating the process.
    #[must_use]
    pub fn install() -> Self {
        let interrupt = Self::new();
        let flag = Arc::clone(&interrupt.flag);

        match ctrlc::set_handler(move || {
            flag.store(true, Ordering::SeqCst);
        }) {
            Ok(()) => debug!("Interrupt handler installed"),
            Err(e) => warn!("Could not install Ctrl-C handler: {}", e),
        }

        interrupt
    }

    /// Whether an interrupt has been received
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Raise the flag by hand
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Resolve once the flag is raised
    pub async fn wait(&self) {
        while !self.is_set() {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}
