//! Command-line argument parsing and validation

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// PaoPao command dispatcher - runs, installs and manages plugin commands
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "ppc")]
pub struct Args {
    /// Enable debug output
    #[arg(long, global = true)]
    pub debug: bool,

    /// Root directory for commands, addons and cache
    #[arg(long, global = true, env = "PPC_HOME")]
    pub home: Option<PathBuf>,

    /// Ignore the command metadata cache
    #[arg(long, global = true)]
    pub no_cache: bool,

    /// Run timeout for commands, in seconds
    #[arg(long, global = true, env = "PPC_RUN_TIMEOUT", value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Interpreter used to run commands
    #[arg(long, global = true, env = "PPC_INTERPRETER")]
    pub interpreter: Option<String>,

    /// Subcommand to execute; without one the command overview is shown
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Which command root to show
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceFilter {
    #[default]
    All,
    Official,
    Community,
}

/// Sort key for `list`
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    Name,
    Version,
    Author,
    Installed,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Install a command from a git repository
    Install {
        /// Repository URL (https, git or ssh)
        repo_url: String,

        /// Folder name for the command (defaults to the repository name)
        #[arg(short, long)]
        name: Option<String>,

        /// Branch to check out
        #[arg(short, long)]
        branch: Option<String>,

        /// Overwrite an existing command without asking
        #[arg(short, long)]
        force: bool,

        /// Clone full history
        #[arg(long)]
        no_shallow: bool,

        /// Skip URL and script security checks
        #[arg(long)]
        no_verify: bool,
    },

    /// Update a command installed from git
    Update {
        /// Command folder name
        name: String,

        /// Reset to the remote even when already up to date
        #[arg(short, long)]
        force: bool,
    },

    /// Remove a community command
    Uninstall {
        /// Command folder name
        name: String,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// List available commands
    List {
        #[arg(long, value_enum, default_value_t)]
        source: SourceFilter,

        #[arg(long, value_enum, default_value_t)]
        sort: SortKey,

        /// Reverse the sort order
        #[arg(long)]
        reverse: bool,

        /// Show install dates and dependencies
        #[arg(long)]
        detailed: bool,
    },

    /// Show everything known about a command
    Info {
        name: String,
    },

    /// Search commands by name, description or author
    Search {
        term: String,

        #[arg(long, value_enum, default_value_t)]
        source: SourceFilter,
    },

    /// Check the installation for problems
    Doctor {
        /// Show details for every check
        #[arg(short, long)]
        verbose: bool,
    },

    /// Run a local script through the command loader (run timeout
    /// defaults to 30 seconds)
    Test {
        /// Script to run
        #[arg(long, default_value = "main.py")]
        file: PathBuf,

        /// Scan the script for risky constructs first
        #[arg(long)]
        validate: bool,

        /// Arguments passed to main(argv)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Run a discovered command
    #[command(external_subcommand)]
    Run(Vec<String>),
}

/// Parse command line arguments
pub fn parse_args() -> Args {
    Args::parse()
}
