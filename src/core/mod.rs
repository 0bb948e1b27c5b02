//! Core functionality for command dispatch
//!
//! Contains discovery and caching of command metadata, the install/update
//! orchestrator with its lock and security gate, and the plugin executor.

pub mod cache;
pub mod context;
pub mod discovery;
pub mod executor;
pub mod git;
pub mod installer;
pub mod lock;
pub mod metadata;
pub mod prompt;
pub mod security;

pub use cache::{CacheEntry, CacheMap, CacheStatus, CommandCache};
pub use context::Context;
pub use discovery::{CommandTable, Discovery};
pub use executor::{Executor, Invocation};
pub use git::GitClient;
pub use installer::{
    InstallOutcome, InstallRequest, InstallStage, Installer, RepoLayout, UninstallOutcome,
    UpdateOutcome,
};
pub use lock::{InstallLock, LockPolicy};
pub use metadata::{CommandRecord, InstallRecord, MetadataStore, Source};
pub use prompt::{Prompter, ScriptedPrompter, TerminalPrompter};
pub use security::{SecurityGate, UrlVerdict};
