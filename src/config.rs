//! Configuration management for the dispatcher
//!
//! Centralizes directory layout, timeouts and security policy, and provides
//! validation.

use crate::{cli::Args, error::DispatchError, utils::fs::FileSystemUtils};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Enable debug logging
    pub debug: bool,
    /// Root directory holding commands, addons and the cache
    pub home: PathBuf,
    /// Built-in command root
    pub official_dir: PathBuf,
    /// Community (git-installed) command root
    pub community_dir: PathBuf,
    /// Cache document and lock marker directory
    pub cache_dir: PathBuf,
    /// File and directory naming rules
    pub layout: LayoutConfig,
    /// Metadata cache configuration
    pub cache: CacheConfig,
    /// Install/update configuration
    pub install: InstallConfig,
    /// Security gate configuration
    pub security: SecurityConfig,
    /// Plugin runtime configuration
    pub runtime: RuntimeConfig,
}

/// File and directory naming rules shared by discovery and install
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutConfig {
    /// Project descriptor file name
    pub project_meta_file: String,
    /// Alternate TOML project descriptor file name
    pub project_meta_toml_file: String,
    /// Git-install descriptor file name
    pub git_meta_file: String,
    /// Entry script inside a command directory
    pub entry_script: String,
    /// Subdirectory of a multi-command addon
    pub commands_subdir: String,
    /// Extension of loadable scripts
    pub script_extension: String,
}

/// Metadata cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether discovery consults the cache
    pub enabled: bool,
    /// Cache document file name
    pub file_name: String,
    /// Age after which the whole document is ignored
    pub expiry: Duration,
}

/// Install/update configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallConfig {
    /// Git executable
    pub git_binary: String,
    /// Wall-clock ceiling for a clone
    pub clone_timeout: Duration,
    /// Wall-clock ceiling for a fetch
    pub fetch_timeout: Duration,
    /// Lock poll attempts before giving up
    pub lock_attempts: u32,
    /// Delay between lock poll attempts
    pub lock_interval: Duration,
}

/// Security gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// URL schemes accepted for install
    pub allowed_schemes: Vec<String>,
    /// Substrings that reject a URL outright
    pub blocked_url_patterns: Vec<String>,
    /// Hosts that do not trigger an unknown-host warning
    pub trusted_hosts: Vec<String>,
    /// Largest script accepted, in bytes
    pub max_script_size: u64,
    /// Substrings that require confirmation before a script is accepted
    pub risk_markers: Vec<String>,
}

/// Plugin runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Interpreter used to load scripts
    pub interpreter: String,
    /// Time allowed for a script to load and expose `main`
    pub load_timeout: Duration,
    /// Time allowed for `main` to return; `None` means unbounded
    pub run_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self::with_home(default_home())
    }
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            project_meta_file: "ppc.project.json".to_string(),
            project_meta_toml_file: "ppc.project.toml".to_string(),
            git_meta_file: ".ppc.git".to_string(),
            entry_script: "main.py".to_string(),
            commands_subdir: "commands".to_string(),
            script_extension: "py".to_string(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            file_name: "commands_cache.json".to_string(),
            expiry: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            git_binary: "git".to_string(),
            clone_timeout: Duration::from_secs(300),
            fetch_timeout: Duration::from_secs(60),
            lock_attempts: 30,
            lock_interval: Duration::from_secs(1),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_schemes: vec!["https".to_string(), "git".to_string(), "ssh".to_string()],
            blocked_url_patterns: vec![
                "localhost".to_string(),
                "127.0.0.1".to_string(),
                "0.0.0.0".to_string(),
                "[::1]".to_string(),
                "file://".to_string(),
                "..".to_string(),
            ],
            trusted_hosts: vec![
                "github.com".to_string(),
                "gitlab.com".to_string(),
                "bitbucket.org".to_string(),
                "codeberg.org".to_string(),
            ],
            max_script_size: 10 * 1024 * 1024,
            risk_markers: vec![
                "subprocess".to_string(),
                "os.system".to_string(),
                "eval".to_string(),
                "exec".to_string(),
                "__import__".to_string(),
            ],
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            load_timeout: Duration::from_secs(10),
            run_timeout: None,
        }
    }
}

fn default_home() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ppc")
}

impl Config {
    /// Configuration rooted at `home` with every other value defaulted
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        Self {
            debug: false,
            official_dir: home.join("commands"),
            community_dir: home.join("addons"),
            cache_dir: home.join(".cache"),
            home,
            layout: LayoutConfig::default(),
            cache: CacheConfig::default(),
            install: InstallConfig::default(),
            security: SecurityConfig::default(),
            runtime: RuntimeConfig::default(),
        }
    }

    /// Create configuration from command line arguments
    pub fn from_args(args: &Args) -> Result<Self, DispatchError> {
        let mut config = match &args.home {
            Some(home) => Self::with_home(home),
            None => Self::default(),
        };
        config.debug = args.debug;
        config.cache.enabled = !args.no_cache;

        if let Some(secs) = args.timeout {
            config.runtime.run_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(interpreter) = &args.interpreter {
            config.runtime.interpreter.clone_from(interpreter);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.home.as_os_str().is_empty() {
            return Err(DispatchError::config("Home directory must not be empty"));
        }

        if self.runtime.interpreter.trim().is_empty() {
            return Err(DispatchError::config("Interpreter must not be empty"));
        }

        if self.runtime.run_timeout == Some(Duration::ZERO) {
            return Err(DispatchError::config("Run timeout must be at least 1 second"));
        }

        if self.install.lock_attempts == 0 {
            return Err(DispatchError::config("Lock attempts must be at least 1"));
        }

        Ok(())
    }

    /// Create the command roots and cache directory.
    ///
    /// Failures are logged; discovery copes with missing roots.
    pub fn ensure_dirs(&self) {
        let fs_utils = FileSystemUtils::new();
        for dir in [&self.official_dir, &self.community_dir, &self.cache_dir] {
            if let Err(e) = fs_utils.create_dir_all(dir) {
                warn!("Cannot create directory {}: {}", dir.display(), e);
            }
        }
    }

    /// Path of the cache document
    pub fn cache_file(&self) -> PathBuf {
        self.cache_dir.join(&self.cache.file_name)
    }

    /// Path of the lock marker guarding `target_name`
    pub fn lock_file(&self, target_name: &str) -> PathBuf {
        self.cache_dir.join(format!("{target_name}.install.lock"))
    }

    /// Directory a community command named `name` is installed into
    pub fn community_target(&self, name: &str) -> PathBuf {
        self.community_dir.join(name)
    }

    /// Git-install descriptor inside a command directory
    pub fn install_record_path(&self, command_dir: &Path) -> PathBuf {
        command_dir.join(&self.layout.git_meta_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_with_home_layout() {
        let config = Config::with_home("/tmp/ppc-home");
        assert_eq!(config.official_dir, PathBuf::from("/tmp/ppc-home/commands"));
        assert_eq!(config.community_dir, PathBuf::from("/tmp/ppc-home/addons"));
        assert_eq!(
            config.cache_file(),
            PathBuf::from("/tmp/ppc-home/.cache/commands_cache.json")
        );
        assert_eq!(
            config.lock_file("greet"),
            PathBuf::from("/tmp/ppc-home/.cache/greet.install.lock")
        );
    }

    #[test]
    fn test_ensure_dirs_creates_roots() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config = Config::with_home(temp_dir.path().join("nested").join("home"));

        config.ensure_dirs();

        assert!(config.official_dir.is_dir());
        assert!(config.community_dir.is_dir());
        assert!(config.cache_dir.is_dir());
    }

    #[test]
    fn test_defaults() {
        let config = Config::with_home("/tmp/ppc-home");
        assert_eq!(config.cache.expiry, Duration::from_secs(86_400));
        assert_eq!(config.install.clone_timeout, Duration::from_secs(300));
        assert_eq!(config.install.lock_attempts, 30);
        assert_eq!(config.security.max_script_size, 10 * 1024 * 1024);
        assert!(config.runtime.load_timeout < Duration::from_secs(300));
        assert!(config.runtime.run_timeout.is_none());
    }

    #[test]
    fn test_from_args_overrides() {
        let args = Args::try_parse_from([
            "ppc",
            "--home",
            "/tmp/ppc-home",
            "--no-cache",
            "--timeout",
            "5",
            "list",
        ])
        .unwrap();

        let config = Config::from_args(&args).unwrap();
        assert_eq!(config.home, PathBuf::from("/tmp/ppc-home"));
        assert!(!config.cache.enabled);
        assert_eq!(config.runtime.run_timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        let args =
            Args::try_parse_from(["ppc", "--home", "/tmp/ppc-home", "--timeout", "0", "list"])
                .unwrap();
        assert!(matches!(
            Config::from_args(&args),
            Err(DispatchError::Config { .. })
        ));
    }
}
