//! Per-invocation context
//!
//! Created once by the CLI entry point and passed down; components are
//! built from it on demand. Nothing here is global.

use crate::config::Config;
use crate::core::discovery::Discovery;
use crate::core::executor::Executor;
use crate::core::installer::Installer;
use crate::core::prompt::{Prompter, TerminalPrompter};
use crate::core::security::SecurityGate;
use crate::error::Result;
use crate::utils::interrupt::Interrupt;

pub struct Context {
    pub config: Config,
    pub interrupt: Interrupt,
    prompter: Box<dyn Prompter>,
}

impl Context {
    /// Context prompting on the terminal
    pub fn new(config: Config, interrupt: Interrupt) -> Self {
        Self::with_prompter(config, interrupt, Box::new(TerminalPrompter::new()))
    }

    pub fn with_prompter(config: Config, interrupt: Interrupt, prompter: Box<dyn Prompter>) -> Self {
        Self {
            config,
            interrupt,
            prompter,
        }
    }

    pub fn prompter(&self) -> &dyn Prompter {
        self.prompter.as_ref()
    }

    pub fn discovery(&self) -> Discovery {
        Discovery::new(self.config.clone())
    }

    pub fn security(&self) -> Result<SecurityGate> {
        SecurityGate::new(self.config.security.clone())
    }

    pub fn installer(&self) -> Result<Installer<'_>> {
        Installer::new(&self.config, &self.interrupt, self.prompter())
    }

    pub fn executor(&self) -> Executor {
        Executor::new(self.config.runtime.clone(), self.interrupt.clone())
    }
}
