//! Install, update and uninstall of community commands
//!
//! Every operation that touches a command directory holds that target's
//! [`InstallLock`]. An install moves through [`InstallStage`]s inside a
//! staging directory next to the target and is swapped into place only once
//! every stage succeeded. A failed install drops the staging directory and
//! leaves any previous install of the same name as it was.
//!
//! Update and uninstall accept either a command name or an addon folder
//! name; a command name resolves to the addon folder that provides it.

use crate::config::Config;
use crate::core::cache::CommandCache;
use crate::core::discovery::{Discovery, list_scripts};
use crate::core::git::{GitClient, UPSTREAM};
use crate::core::lock::{InstallLock, LockPolicy};
use crate::core::metadata::{InstallRecord, MetadataStore, Source};
use crate::core::prompt::Prompter;
use crate::core::security::{SecurityGate, validate_folder_name};
use crate::error::{DispatchError, Result};
use crate::utils::fs::FileSystemUtils;
use crate::utils::interrupt::Interrupt;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// Parameters of one install
#[derive(Debug, Clone)]
pub struct InstallRequest {
    pub repo_url: String,
    /// Folder name override; derived from the URL when absent
    pub name: Option<String>,
    pub branch: Option<String>,
    /// Overwrite an existing command without asking
    pub force: bool,
    pub shallow: bool,
    /// Run the URL and script content checks
    pub verify: bool,
}

impl InstallRequest {
    pub fn new(repo_url: impl Into<String>) -> Self {
        Self {
            repo_url: repo_url.into(),
            name: None,
            branch: None,
            force: false,
            shallow: true,
            verify: true,
        }
    }

    /// Target folder name: the override, or the last URL path segment
    /// without a `.git` suffix
    pub fn folder_name(&self) -> Result<String> {
        let name = match &self.name {
            Some(name) => name.clone(),
            None => {
                let last = self
                    .repo_url
                    .trim_end_matches('/')
                    .rsplit(['/', ':'])
                    .next()
                    .unwrap_or_default();
                last.strip_suffix(".git").unwrap_or(last).to_string()
            }
        };
        validate_folder_name(&name)?;
        Ok(name)
    }
}

/// Progress of an install; `Failed` is implied by the error return
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum InstallStage {
    Start,
    LockAcquired,
    Cloned,
    Validated,
    MetadataWritten,
    Done,
}

/// What a cloned repository provides
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoLayout {
    /// `commands/<name>.py` scripts
    MultiCommand(Vec<String>),
    /// A single `main.py` named after the folder
    Legacy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed {
        name: String,
        target: PathBuf,
        layout: RepoLayout,
        /// Unknown-host notice from the URL check
        warning: Option<String>,
    },
    /// The user declined to overwrite an existing command
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    UpToDate,
    Updated { commits: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UninstallOutcome {
    Removed,
    Cancelled,
}

/// Drives install, update and uninstall for the community root
pub struct Installer<'a> {
    config: &'a Config,
    interrupt: &'a Interrupt,
    prompter: &'a dyn Prompter,
    git: GitClient,
    gate: SecurityGate,
    store: MetadataStore,
    cache: CommandCache,
    fs_utils: FileSystemUtils,
}

impl<'a> Installer<'a> {
    pub fn new(
        config: &'a Config,
        interrupt: &'a Interrupt,
        prompter: &'a dyn Prompter,
    ) -> Result<Self> {
        Ok(Self {
            git: GitClient::new(&config.install.git_binary, config.debug),
            gate: SecurityGate::new(config.security.clone())?,
            store: MetadataStore::new(config.layout.clone()),
            cache: CommandCache::new(config.cache_file(), config.cache.expiry),
            fs_utils: FileSystemUtils::new(),
            config,
            interrupt,
            prompter,
        })
    }

    fn lock_policy(&self) -> LockPolicy {
        LockPolicy {
            attempts: self.config.install.lock_attempts,
            interval: self.config.install.lock_interval,
        }
    }

    fn lock(&self, name: &str) -> Result<InstallLock> {
        InstallLock::acquire(
            &self.config.lock_file(name),
            name,
            self.lock_policy(),
            self.interrupt,
        )
    }

    fn remove_dir(&self, dir: &Path) -> Result<()> {
        self.fs_utils
            .remove_dir_all_if_exists(dir)
            .map(|_| ())
            .map_err(|e| DispatchError::file_system("remove directory", dir, e))
    }

    /// Install a repository as a community command
    #[instrument(skip(self))]
    pub fn install(&self, request: &InstallRequest) -> Result<InstallOutcome> {
        let warning = if request.verify {
            self.gate.validate_url(&request.repo_url)?.warning
        } else {
            warn!("Skipping security checks for {}", request.repo_url);
            None
        };

        let name = request.folder_name()?;
        let target = self.config.community_target(&name);

        let mut stage = InstallStage::Start;
        let _lock = self.lock(&name)?;
        stage = self.advance(stage, InstallStage::LockAcquired);

        if target.exists() && !request.force {
            let prompt = format!("Command '{name}' already exists. Overwrite?");
            if !self.prompter.confirm(&prompt, false)? {
                info!("Installation of '{}' cancelled", name);
                return Ok(InstallOutcome::Cancelled);
            }
        }

        info!("Installing '{}' from {}...", name, request.repo_url);
        let staging = self.staging_dir(&name)?;
        let staged = staging.path().join(&name);

        let layout = match self.populate(request, &name, &staged, &mut stage) {
            Ok(layout) => layout,
            Err(e) => {
                warn!("Install of '{}' failed at {:?}, rolling back", name, stage);
                return Err(e);
            }
        };

        self.remove_dir(&target)?;
        self.fs_utils
            .rename(&staged, &target)
            .map_err(|e| DispatchError::file_system("move staged install", &target, e))?;

        self.cache.invalidate();
        self.advance(stage, InstallStage::Done);
        info!("Successfully installed: {}", name);
        Ok(InstallOutcome::Installed {
            name,
            target,
            layout,
            warning,
        })
    }

    /// Scratch directory beside the install target, removed on drop
    fn staging_dir(&self, name: &str) -> Result<tempfile::TempDir> {
        let root = &self.config.community_dir;
        self.fs_utils
            .create_dir_all(root)
            .map_err(|e| DispatchError::file_system("create directory", root, e))?;
        tempfile::Builder::new()
            .prefix(&format!(".{name}.staging-"))
            .tempdir_in(root)
            .map_err(|e| DispatchError::file_system("create staging directory", root, e))
    }

    fn advance(&self, from: InstallStage, to: InstallStage) -> InstallStage {
        debug!("Install stage {:?} -> {:?}", from, to);
        to
    }

    fn populate(
        &self,
        request: &InstallRequest,
        name: &str,
        target: &Path,
        stage: &mut InstallStage,
    ) -> Result<RepoLayout> {
        self.git.clone_repo(
            &request.repo_url,
            target,
            request.shallow,
            request.branch.as_deref(),
            self.config.install.clone_timeout,
            self.interrupt,
        )?;
        *stage = self.advance(*stage, InstallStage::Cloned);

        let layout = self.detect_layout(target)?;
        if request.verify {
            for script in self.all_scripts(target) {
                self.gate.validate_script(&script, self.prompter)?;
            }
        }
        *stage = self.advance(*stage, InstallStage::Validated);

        let record = InstallRecord::new(
            &request.repo_url,
            name,
            request.shallow,
            request.branch.clone(),
        );
        self.store.write_install_record(target, &record)?;
        *stage = self.advance(*stage, InstallStage::MetadataWritten);

        Ok(layout)
    }

    /// Which layout a cloned repository provides. A repository with no
    /// loadable script in either layout is rejected.
    pub fn detect_layout(&self, dir: &Path) -> Result<RepoLayout> {
        let layout = &self.config.layout;
        let commands: Vec<String> = list_scripts(&dir.join(&layout.commands_subdir), &layout.script_extension)
            .iter()
            .filter_map(|path| path.file_stem().and_then(|s| s.to_str()).map(str::to_string))
            .collect();

        if !commands.is_empty() {
            debug!("Multi-command repository: {}", commands.join(", "));
            return Ok(RepoLayout::MultiCommand(commands));
        }

        if dir.join(&layout.entry_script).is_file() {
            debug!("Legacy single-command repository");
            return Ok(RepoLayout::Legacy);
        }

        Err(DispatchError::validation(format!(
            "No loadable commands found: expected {}/*.{} or {}",
            layout.commands_subdir, layout.script_extension, layout.entry_script
        )))
    }

    /// Every script in the working tree, outside `.git`
    fn all_scripts(&self, dir: &Path) -> Vec<PathBuf> {
        let pattern = format!(
            "{}/**/*.{}",
            glob::Pattern::escape(&dir.to_string_lossy()),
            self.config.layout.script_extension
        );

        let Ok(paths) = glob::glob(&pattern) else {
            return Vec::new();
        };

        let git_dir = dir.join(".git");
        let mut scripts: Vec<PathBuf> = paths
            .filter_map(std::result::Result::ok)
            .filter(|path| path.is_file() && !path.starts_with(&git_dir))
            .collect();
        scripts.sort();
        scripts
    }

    /// Addon folder behind `name`: the folder providing the community
    /// command of that name, else the folder literally called `name`
    fn resolve_addon(&self, name: &str) -> Result<(String, PathBuf)> {
        let table = Discovery::new(self.config.clone()).discover(false);
        let provider = table
            .get(name)
            .filter(|record| record.source == Source::Community)
            .and_then(|record| self.addon_root(&record.file_path));

        if let Some(root) = provider {
            if let Some(folder) = root.file_name().and_then(|n| n.to_str()) {
                if folder != name {
                    debug!("Command '{}' is provided by addon '{}'", name, folder);
                }
                return Ok((folder.to_string(), root));
            }
        }

        validate_folder_name(name)?;
        Ok((name.to_string(), self.config.community_target(name)))
    }

    /// Addon directory holding `script`, for both community layouts
    fn addon_root(&self, script: &Path) -> Option<PathBuf> {
        let mut dir = script.parent()?;
        if dir.ends_with(&self.config.layout.commands_subdir) {
            dir = dir.parent()?;
        }
        (dir.parent() == Some(self.config.community_dir.as_path())).then(|| dir.to_path_buf())
    }

    /// Bring a git-installed command up to date with its remote
    #[instrument(skip(self))]
    pub fn update(&self, name: &str, force: bool) -> Result<UpdateOutcome> {
        let (folder, target) = self.resolve_addon(name)?;

        let Some(mut record) = self.store.read_install_record(&target)? else {
            return Err(DispatchError::NotInstalled {
                name: name.to_string(),
            });
        };

        let _lock = self.lock(&folder)?;

        info!("Checking for updates to '{}'...", name);
        self.git.fetch(
            &target,
            record.shallow,
            self.config.install.fetch_timeout,
            self.interrupt,
        )?;

        let behind = self.git.commits_behind(&target, UPSTREAM)?;
        if behind == 0 && !force {
            info!("'{}' is already up to date", name);
            return Ok(UpdateOutcome::UpToDate);
        }

        self.git.reset_hard(&target, UPSTREAM)?;
        record.last_updated_at = Utc::now();
        self.store.write_install_record(&target, &record)?;
        self.cache.invalidate();

        let revision = self.git.head(&target)?;
        info!(
            "Updated '{}' to {} ({} new commit(s))",
            name,
            revision.get(..12).unwrap_or(&revision),
            behind
        );
        Ok(UpdateOutcome::Updated { commits: behind })
    }

    /// Remove a community command directory
    #[instrument(skip(self))]
    pub fn uninstall(&self, name: &str, yes: bool) -> Result<UninstallOutcome> {
        let (folder, target) = self.resolve_addon(name)?;

        if !target.is_dir() {
            return Err(DispatchError::validation(format!(
                "Community command '{name}' is not installed"
            )));
        }

        if !yes {
            let prompt = format!("Uninstall '{name}' and delete {}?", target.display());
            if !self.prompter.confirm(&prompt, false)? {
                info!("Uninstall of '{}' cancelled", name);
                return Ok(UninstallOutcome::Cancelled);
            }
        }

        let _lock = self.lock(&folder)?;
        self.remove_dir(&target)?;
        self.cache.invalidate();

        info!("Uninstalled: {}", folder);
        Ok(UninstallOutcome::Removed)
    }
}
