//! Command discovery
//!
//! Scans the official and community roots, builds one record per loadable
//! script and merges them into a single name-ordered table. Community
//! records replace official records of the same name.
//!
//! Official layout:
//! - `<root>/<name>.py` (names starting with `_` are skipped)
//! - `<root>/<name>/main.py`
//!
//! Community layout, one directory per addon:
//! - `<addon>/commands/<name>.py` (multi-command addon)
//! - `<addon>/main.py`, named after the addon (legacy single-command addon)
//!
//! Any filesystem error drops the affected entry or root and nothing else.

use crate::config::Config;
use crate::core::cache::{CacheEntry, CacheMap, CommandCache};
use crate::core::metadata::{CommandRecord, MetadataStore, Source};
use crate::utils::fs::FileSystemUtils;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument, warn};

/// Result of a discovery pass, ordered by command name
pub type CommandTable = BTreeMap<String, CommandRecord>;

/// Merge two scans. Community entries win whole, never field by field.
pub fn merge(official: CommandTable, community: CommandTable) -> CommandTable {
    let mut table = official;
    for (name, record) in community {
        if table.contains_key(&name) {
            debug!("Community command '{}' overrides official command", name);
        }
        table.insert(name, record);
    }
    table
}

/// Cache bookkeeping for one pass
struct PassCache {
    loaded: CacheMap,
    seen: CacheMap,
}

/// Discovers commands under the configured roots
#[derive(Debug)]
pub struct Discovery {
    config: Config,
    store: MetadataStore,
    cache: CommandCache,
    fs_utils: FileSystemUtils,
}

impl Discovery {
    pub fn new(config: Config) -> Self {
        Self {
            store: MetadataStore::new(config.layout.clone()),
            cache: CommandCache::new(config.cache_file(), config.cache.expiry),
            fs_utils: FileSystemUtils::new(),
            config,
        }
    }

    /// The cache this discovery reads and writes
    pub fn cache(&self) -> &CommandCache {
        &self.cache
    }

    /// Run one discovery pass. With `use_cache` false the cache document is
    /// neither read nor written.
    #[instrument(skip(self))]
    pub fn discover(&self, use_cache: bool) -> CommandTable {
        let mut pass = PassCache {
            loaded: if use_cache {
                self.cache.load()
            } else {
                CacheMap::new()
            },
            seen: CacheMap::new(),
        };

        let official = self.scan_official(&mut pass);
        let community = self.scan_community(&mut pass);
        let table = merge(official, community);

        if use_cache && pass.seen != pass.loaded {
            self.cache.save(&pass.seen);
        }

        debug!("Discovered {} commands", table.len());
        table
    }

    fn scan_official(&self, pass: &mut PassCache) -> CommandTable {
        let root = &self.config.official_dir;
        let mut table = CommandTable::new();

        for script in self.scripts_in(root) {
            let Some(name) = file_stem(&script) else {
                continue;
            };
            if let Some(record) = self.resolve(&script, root, &name, Source::Official, pass) {
                table.insert(name, record);
            }
        }

        for dir in subdirectories(root) {
            let script = dir.join(&self.config.layout.entry_script);
            if !script.is_file() {
                continue;
            }
            let Some(name) = file_name(&dir) else {
                continue;
            };
            if let Some(record) = self.resolve(&script, &dir, &name, Source::Official, pass) {
                table.insert(name, record);
            }
        }

        table
    }

    fn scan_community(&self, pass: &mut PassCache) -> CommandTable {
        let mut table = CommandTable::new();

        for addon in subdirectories(&self.config.community_dir) {
            let commands_dir = addon.join(&self.config.layout.commands_subdir);
            if commands_dir.is_dir() {
                for script in self.scripts_in(&commands_dir) {
                    let Some(name) = file_stem(&script) else {
                        continue;
                    };
                    if let Some(record) =
                        self.resolve(&script, &addon, &name, Source::Community, pass)
                    {
                        insert_community(&mut table, name, record);
                    }
                }
            }

            let legacy = addon.join(&self.config.layout.entry_script);
            if legacy.is_file() {
                let Some(name) = file_name(&addon) else {
                    continue;
                };
                if let Some(record) = self.resolve(&legacy, &addon, &name, Source::Community, pass)
                {
                    insert_community(&mut table, name, record);
                }
            }
        }

        table
    }

    /// Cached record when the script has not changed since it was cached,
    /// a freshly loaded one otherwise
    fn resolve(
        &self,
        script: &Path,
        folder: &Path,
        name: &str,
        source: Source,
        pass: &mut PassCache,
    ) -> Option<CommandRecord> {
        let mtime = match self.fs_utils.modified_secs(script) {
            Ok(mtime) => mtime,
            Err(e) => {
                debug!("Skipping {}: {}", script.display(), e);
                return None;
            }
        };

        let key = CommandCache::key(script);
        if let Some(entry) = pass.loaded.get(&key) {
            if entry.is_fresh(mtime) && entry.metadata.name == name {
                debug!("Cache hit for {}", script.display());
                pass.seen.insert(key, entry.clone());
                return Some(entry.metadata.clone());
            }
        }

        let record = self.store.load(folder, name, source, script);
        pass.seen.insert(
            key,
            CacheEntry {
                metadata: record.clone(),
                mtime,
            },
        );
        Some(record)
    }

    fn scripts_in(&self, dir: &Path) -> Vec<PathBuf> {
        list_scripts(dir, &self.config.layout.script_extension)
    }
}

/// Loadable scripts directly inside `dir`, sorted, without `_`-prefixed names
pub(crate) fn list_scripts(dir: &Path, extension: &str) -> Vec<PathBuf> {
    let pattern = format!(
        "{}/*.{}",
        glob::Pattern::escape(&dir.to_string_lossy()),
        extension
    );

    let paths = match glob::glob(&pattern) {
        Ok(paths) => paths,
        Err(e) => {
            warn!("Invalid scan pattern {}: {}", pattern, e);
            return Vec::new();
        }
    };

    let mut scripts: Vec<PathBuf> = paths
        .filter_map(|entry| match entry {
            Ok(path) => Some(path),
            Err(e) => {
                debug!("Skipping unreadable entry: {}", e);
                None
            }
        })
        .filter(|path| path.is_file())
        .filter(|path| file_name(path).is_some_and(|name| !name.starts_with('_')))
        .collect();
    scripts.sort();
    scripts
}

fn insert_community(table: &mut CommandTable, name: String, record: CommandRecord) {
    if let Some(previous) = table.get(&name) {
        warn!(
            "Command '{}' is provided by both {} and {}; using the latter",
            name,
            previous.file_path.display(),
            record.file_path.display()
        );
    }
    table.insert(name, record);
}

/// Immediate subdirectories of `root` that are not hidden, sorted. An
/// unreadable root yields none.
fn subdirectories(root: &Path) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Cannot read {}: {}", root.display(), e);
            return Vec::new();
        }
    };

    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.is_dir())
        .filter(|path| file_name(path).is_some_and(|name| !name.starts_with('.')))
        .collect();
    dirs.sort();
    dirs
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
}

fn file_stem(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    const SCRIPT: &str = "def main(argv):\n    print(argv)\n";

    fn setup() -> (TempDir, Config) {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::with_home(temp_dir.path());
        config.ensure_dirs();
        (temp_dir, config)
    }

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn bump_mtime(path: &Path) {
        let file = fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(120))
            .unwrap();
    }

    #[test]
    fn test_official_layout() {
        let (_temp, config) = setup();
        write(&config.official_dir.join("head.py"), SCRIPT);
        write(&config.official_dir.join("_helpers.py"), SCRIPT);
        write(&config.official_dir.join("notes.txt"), "x");
        write(&config.official_dir.join("today").join("main.py"), SCRIPT);
        fs::create_dir_all(config.official_dir.join("empty")).unwrap();

        let table = Discovery::new(config.clone()).discover(false);

        let names: Vec<&str> = table.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["head", "today"]);
        assert_eq!(table["head"].source, Source::Official);
        assert_eq!(table["head"].file_path, config.official_dir.join("head.py"));
        assert_eq!(
            table["today"].file_path,
            config.official_dir.join("today").join("main.py")
        );
    }

    #[test]
    fn test_community_layouts() {
        let (_temp, config) = setup();
        let multi = config.community_dir.join("toolbox");
        write(&multi.join("commands").join("greet.py"), SCRIPT);
        write(&multi.join("commands").join("wave.py"), SCRIPT);
        write(&multi.join("commands").join("__init__.py"), "");
        write(
            &multi.join("ppc.project.json"),
            r#"{"version": "2.0", "author": "acme"}"#,
        );
        write(&config.community_dir.join("legacy").join("main.py"), SCRIPT);

        let table = Discovery::new(config.clone()).discover(false);

        let names: Vec<&str> = table.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["greet", "legacy", "wave"]);
        assert_eq!(table["greet"].source, Source::Community);
        assert_eq!(table["greet"].version, "2.0");
        assert_eq!(table["wave"].author, "acme");
        assert_eq!(table["legacy"].version, "Unknown");
    }

    #[test]
    fn test_community_overrides_official() {
        let (_temp, config) = setup();
        write(&config.official_dir.join("greet.py"), SCRIPT);
        write(&config.community_dir.join("greet").join("main.py"), SCRIPT);

        let table = Discovery::new(config.clone()).discover(false);

        assert_eq!(table.len(), 1);
        assert_eq!(table["greet"].source, Source::Community);
        assert_eq!(
            table["greet"].file_path,
            config.community_dir.join("greet").join("main.py")
        );
    }

    #[test]
    fn test_hidden_addon_directories_are_skipped() {
        let (_temp, config) = setup();
        let staging = config.community_dir.join(".tool.staging-x1").join("tool");
        write(&staging.join("commands").join("greet.py"), SCRIPT);
        write(&config.community_dir.join(".hidden").join("main.py"), SCRIPT);

        let table = Discovery::new(config).discover(false);

        assert!(table.is_empty());
    }

    #[test]
    fn test_merge_is_a_whole_record_override() {
        let (_temp, config) = setup();
        let store = MetadataStore::new(config.layout.clone());
        let dir = config.home.clone();
        let official = store.load(&dir, "greet", Source::Official, &dir.join("a.py"));
        let community = store.load(&dir, "greet", Source::Community, &dir.join("b.py"));

        let mut official_table = CommandTable::new();
        official_table.insert("greet".to_string(), official);
        let mut community_table = CommandTable::new();
        community_table.insert("greet".to_string(), community.clone());

        let merged = merge(official_table, community_table);
        assert_eq!(merged["greet"], community);
    }

    #[test]
    fn test_missing_roots_yield_empty_table() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::with_home(temp_dir.path().join("nowhere"));

        assert!(Discovery::new(config).discover(true).is_empty());
    }

    #[test]
    fn test_cache_hit_skips_descriptor_reads() {
        let (_temp, config) = setup();
        let addon = config.community_dir.join("greet");
        write(&addon.join("main.py"), SCRIPT);
        write(&addon.join("ppc.project.json"), r#"{"version": "1.0"}"#);

        let discovery = Discovery::new(config.clone());
        assert_eq!(discovery.discover(true)["greet"].version, "1.0");
        assert!(config.cache_file().exists());

        // Descriptor changes alone do not touch the script mtime.
        write(&addon.join("ppc.project.json"), r#"{"version": "9.9"}"#);
        assert_eq!(discovery.discover(true)["greet"].version, "1.0");

        assert_eq!(discovery.discover(false)["greet"].version, "9.9");
    }

    #[test]
    fn test_newer_script_rebuilds_entry() {
        let (_temp, config) = setup();
        let addon = config.community_dir.join("greet");
        let script = addon.join("main.py");
        write(&script, SCRIPT);
        write(&addon.join("ppc.project.json"), r#"{"version": "1.0"}"#);

        let discovery = Discovery::new(config.clone());
        discovery.discover(true);

        write(&addon.join("ppc.project.json"), r#"{"version": "1.1"}"#);
        bump_mtime(&script);

        assert_eq!(discovery.discover(true)["greet"].version, "1.1");

        let cached = discovery.cache().load();
        let entry = &cached[&CommandCache::key(&script)];
        assert_eq!(entry.metadata.version, "1.1");
    }

    #[test]
    fn test_expired_cache_is_ignored() {
        let (_temp, mut config) = setup();
        let addon = config.community_dir.join("greet");
        write(&addon.join("main.py"), SCRIPT);
        write(&addon.join("ppc.project.json"), r#"{"version": "1.0"}"#);
        Discovery::new(config.clone()).discover(true);

        write(&addon.join("ppc.project.json"), r#"{"version": "2.0"}"#);
        config.cache.expiry = Duration::ZERO;

        assert_eq!(Discovery::new(config).discover(true)["greet"].version, "2.0");
    }

    #[test]
    fn test_rediscovery_is_idempotent() {
        let (_temp, config) = setup();
        write(&config.official_dir.join("head.py"), SCRIPT);
        write(
            &config.community_dir.join("toolbox").join("commands").join("greet.py"),
            SCRIPT,
        );
        write(&config.community_dir.join("legacy").join("main.py"), SCRIPT);

        let discovery = Discovery::new(config);
        let first = discovery.discover(true);
        let second = discovery.discover(true);
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
    }

    #[test]
    fn test_deleted_scripts_are_pruned_from_cache() {
        let (_temp, config) = setup();
        let script = config.official_dir.join("head.py");
        write(&script, SCRIPT);

        let discovery = Discovery::new(config);
        discovery.discover(true);
        assert_eq!(discovery.cache().load().len(), 1);

        fs::remove_file(&script).unwrap();
        assert!(discovery.discover(true).is_empty());
        assert!(discovery.cache().load().is_empty());
    }
}
