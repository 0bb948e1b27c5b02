//! Command metadata records and descriptor files
//!
//! A command directory may carry a project descriptor (`ppc.project.json`,
//! or `ppc.project.toml` as a fallback) and a git-install descriptor
//! (`.ppc.git`). Both are optional and read fail-soft: a broken descriptor
//! is treated exactly like a missing one.

use crate::config::LayoutConfig;
use crate::error::{DispatchError, Result};
use crate::utils::fs::FileSystemUtils;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument, warn};

/// Default author for built-in commands
pub const OFFICIAL_AUTHOR: &str = "PaoPaoDev";

/// Where a command comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Shipped alongside the host
    Official,
    /// Installed from an external repository
    Community,
}

impl Source {
    /// Display label
    pub const fn label(self) -> &'static str {
        match self {
            Self::Official => "Official",
            Self::Community => "Community",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One discovered command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRecord {
    /// Unique key within a discovery pass
    pub name: String,
    pub version: String,
    pub author: String,
    pub description: String,
    pub source: Source,
    /// Present only for git-installed commands
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated_at: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Absolute path to the loadable entry script
    pub file_path: PathBuf,
}

/// Persisted record of a git install
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallRecord {
    pub repo_url: String,
    pub folder_name: String,
    #[serde(rename = "installed_date")]
    pub installed_at: DateTime<Utc>,
    #[serde(rename = "last_updated")]
    pub last_updated_at: DateTime<Utc>,
    pub shallow: bool,
    #[serde(default)]
    pub branch: Option<String>,
}

impl InstallRecord {
    /// Record for an install completing now
    pub fn new(
        repo_url: impl Into<String>,
        folder_name: impl Into<String>,
        shallow: bool,
        branch: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            repo_url: repo_url.into(),
            folder_name: folder_name.into(),
            installed_at: now,
            last_updated_at: now,
            shallow,
            branch,
        }
    }
}

/// General project descriptor
#[derive(Debug, Default, Deserialize)]
struct ProjectDescriptor {
    version: Option<String>,
    author: Option<String>,
    description: Option<String>,
    #[serde(default)]
    dependencies: Vec<String>,
}

/// Git-install descriptor as read for display. Timestamps stay raw so
/// descriptors written by other tools still show up.
#[derive(Debug, Default, Deserialize)]
struct GitDescriptor {
    repo_url: Option<String>,
    installed_date: Option<String>,
    last_updated: Option<String>,
}

struct Defaults {
    version: &'static str,
    author: &'static str,
    description: &'static str,
}

const fn defaults_for(source: Source) -> Defaults {
    match source {
        Source::Official => Defaults {
            version: "Built-In",
            author: OFFICIAL_AUTHOR,
            description: "Built-in command",
        },
        Source::Community => Defaults {
            version: "Unknown",
            author: "Unknown",
            description: "No description available",
        },
    }
}

/// Format a stored timestamp as `YYYY-MM-DD HH:MM`, or return it unchanged
/// when it cannot be parsed.
pub fn format_timestamp(raw: &str) -> String {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.format("%Y-%m-%d %H:%M").to_string();
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return dt.format("%Y-%m-%d %H:%M").to_string();
    }
    raw.to_string()
}

/// Reads and writes descriptor files
#[derive(Debug)]
pub struct MetadataStore {
    layout: LayoutConfig,
    fs_utils: FileSystemUtils,
}

impl MetadataStore {
    pub fn new(layout: LayoutConfig) -> Self {
        Self {
            layout,
            fs_utils: FileSystemUtils::new(),
        }
    }

    /// Build a record for the command `name` whose descriptors live in `folder`
    #[instrument(skip(self))]
    pub fn load(&self, folder: &Path, name: &str, source: Source, file_path: &Path) -> CommandRecord {
        let project = self.read_project(folder);
        let git = self.read_git_descriptor(folder);
        let defaults = defaults_for(source);

        CommandRecord {
            name: name.to_string(),
            version: project
                .version
                .unwrap_or_else(|| defaults.version.to_string()),
            author: project.author.unwrap_or_else(|| defaults.author.to_string()),
            description: project
                .description
                .unwrap_or_else(|| defaults.description.to_string()),
            source,
            repo_url: git.repo_url,
            installed_at: git.installed_date,
            last_updated_at: git.last_updated,
            dependencies: project.dependencies,
            file_path: file_path.to_path_buf(),
        }
    }

    fn read_project(&self, folder: &Path) -> ProjectDescriptor {
        let json_path = folder.join(&self.layout.project_meta_file);
        if json_path.is_file() {
            return self.read_json(&json_path).unwrap_or_default();
        }

        let toml_path = folder.join(&self.layout.project_meta_toml_file);
        if toml_path.is_file() {
            let parsed = self
                .fs_utils
                .read_file_to_string(&toml_path)
                .map_err(|e| e.to_string())
                .and_then(|content| toml::from_str::<ProjectDescriptor>(&content).map_err(|e| e.to_string()));
            return match parsed {
                Ok(descriptor) => descriptor,
                Err(e) => {
                    debug!("Ignoring descriptor {}: {}", toml_path.display(), e);
                    ProjectDescriptor::default()
                }
            };
        }

        ProjectDescriptor::default()
    }

    fn read_git_descriptor(&self, folder: &Path) -> GitDescriptor {
        let path = folder.join(&self.layout.git_meta_file);
        if path.is_file() {
            self.read_json(&path).unwrap_or_default()
        } else {
            GitDescriptor::default()
        }
    }

    fn read_json<T: for<'de> Deserialize<'de>>(&self, path: &Path) -> Option<T> {
        let content = match self.fs_utils.read_file_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                debug!("Ignoring unreadable descriptor {}: {}", path.display(), e);
                return None;
            }
        };

        match serde_json::from_str(&content) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!("Ignoring invalid descriptor {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Read the install record of a command directory.
    ///
    /// `Ok(None)` means the command was not installed from a repository.
    pub fn read_install_record(&self, command_dir: &Path) -> Result<Option<InstallRecord>> {
        let path = command_dir.join(&self.layout.git_meta_file);
        if !path.is_file() {
            return Ok(None);
        }

        let content = self
            .fs_utils
            .read_file_to_string(&path)
            .map_err(|e| DispatchError::file_system("read install record", &path, e))?;

        serde_json::from_str(&content).map(Some).map_err(|e| {
            warn!("Install record {} is corrupt: {}", path.display(), e);
            DispatchError::validation(format!(
                "Error reading install metadata {}: {e}",
                path.display()
            ))
        })
    }

    /// Write the install record of a command directory
    pub fn write_install_record(&self, command_dir: &Path, record: &InstallRecord) -> Result<()> {
        let path = command_dir.join(&self.layout.git_meta_file);
        let content = serde_json::to_string_pretty(record)
            .map_err(|e| DispatchError::validation(format!("Cannot serialize install record: {e}")))?;

        self.fs_utils
            .write_file(&path, content)
            .map_err(|e| DispatchError::file_system("write install record", &path, e))
    }
}
