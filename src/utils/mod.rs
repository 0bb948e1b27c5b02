//! Utility modules for common functionality
//!
//! Provides reusable utilities for file operations, process execution,
//! and interrupt handling.

pub mod fs;
pub mod interrupt;
pub mod process;

pub use fs::FileSystemUtils;
pub use interrupt::Interrupt;
pub use process::{BoundedOutcome, ProcessResult, ProcessRunner};
