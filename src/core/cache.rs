//! Command metadata cache
//!
//! A single JSON document maps a digest of each script path to the record
//! built for it and the script's modification time at that moment. An entry
//! is reused only while the script's mtime has not moved past the stored
//! one, and the whole document is ignored once it is older than the
//! configured expiry.
//!
//! Concurrent writers are not coordinated: the last save wins. Saves go
//! through a temporary file and a rename, so readers never see a torn
//! document.

use crate::core::metadata::CommandRecord;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, instrument, warn};

/// Cached record for one script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub metadata: CommandRecord,
    /// Script mtime, in seconds since the Unix epoch, when the entry was built
    pub mtime: f64,
}

impl CacheEntry {
    /// Whether this entry still describes a script whose mtime is `current_mtime`
    pub fn is_fresh(&self, current_mtime: f64) -> bool {
        current_mtime <= self.mtime
    }
}

/// Cache document contents, keyed by path digest
pub type CacheMap = BTreeMap<String, CacheEntry>;

/// Cache document state as reported by `doctor`
#[derive(Debug, Clone, PartialEq)]
pub enum CacheStatus {
    /// No document on disk
    Absent,
    /// Document within its expiry
    Valid { entries: usize, age: Duration },
    /// Document past its expiry
    Expired { entries: usize, age: Duration },
    /// Document present but not readable as a cache
    Corrupt(String),
}

/// Loads, saves and invalidates the cache document
#[derive(Debug, Clone)]
pub struct CommandCache {
    path: PathBuf,
    expiry: Duration,
}

impl CommandCache {
    pub fn new(path: impl Into<PathBuf>, expiry: Duration) -> Self {
        Self {
            path: path.into(),
            expiry,
        }
    }

    /// Location of the cache document
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Deterministic digest of an absolute path, used as the map key
    pub fn key(path: &Path) -> String {
        let mut hasher = Sha256::new();
        hasher.update(path.to_string_lossy().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn age(&self) -> io::Result<Duration> {
        let modified = std::fs::metadata(&self.path)?.modified()?;
        Ok(SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO))
    }

    fn read_map(&self) -> Result<CacheMap, String> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| e.to_string())?;
        serde_json::from_str(&content).map_err(|e| e.to_string())
    }

    /// Whether the document exists and is younger than the expiry
    pub fn is_valid(&self) -> bool {
        match self.age() {
            Ok(age) => age < self.expiry,
            Err(_) => false,
        }
    }

    /// Load the cached map, or an empty one when the document is absent,
    /// expired or corrupt
    #[instrument(skip(self))]
    pub fn load(&self) -> CacheMap {
        if !self.is_valid() {
            debug!("Cache absent or expired: {}", self.path.display());
            return CacheMap::new();
        }

        match self.read_map() {
            Ok(map) => {
                debug!("Loaded {} cache entries", map.len());
                map
            }
            Err(e) => {
                debug!("Ignoring corrupt cache {}: {}", self.path.display(), e);
                CacheMap::new()
            }
        }
    }

    /// Persist the map. Failures are logged and otherwise ignored.
    #[instrument(skip(self, map))]
    pub fn save(&self, map: &CacheMap) {
        if let Err(e) = self.write_map(map) {
            warn!("Could not save cache {}: {}", self.path.display(), e);
        }
    }

    fn write_map(&self, map: &CacheMap) -> io::Result<()> {
        let dir = self
            .path
            .parent()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "cache path has no parent"))?;
        std::fs::create_dir_all(dir)?;

        let content = serde_json::to_vec_pretty(map)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&content)?;
        tmp.persist(&self.path).map_err(|e| e.error)?;

        debug!("Saved {} cache entries", map.len());
        Ok(())
    }

    /// Delete the document so the next discovery rebuilds every entry
    #[instrument(skip(self))]
    pub fn invalidate(&self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Cache invalidated"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not invalidate cache {}: {}", self.path.display(), e),
        }
    }

    /// Describe the document for diagnostics
    pub fn status(&self) -> CacheStatus {
        let age = match self.age() {
            Ok(age) => age,
            Err(_) => return CacheStatus::Absent,
        };

        match self.read_map() {
            Ok(map) if age < self.expiry => CacheStatus::Valid {
                entries: map.len(),
                age,
            },
            Ok(map) => CacheStatus::Expired {
                entries: map.len(),
                age,
            },
            Err(e) => CacheStatus::Corrupt(e),
        }
    }
}
