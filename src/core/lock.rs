//! Per-target install lock
//!
//! A marker file created with `create_new` (atomic create-if-absent) grants
//! exclusive ownership of one install target. It holds the owner's process
//! id for humans; only its existence matters. The marker is removed when
//! the guard drops, on success, error and interrupt alike.

use crate::error::{DispatchError, Result};
use crate::utils::interrupt::Interrupt;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How long to wait for a busy lock
#[derive(Debug, Clone, Copy)]
pub struct LockPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

/// Held lock marker
#[derive(Debug)]
pub struct InstallLock {
    path: PathBuf,
}

impl InstallLock {
    /// Take the lock at `path`, polling while another owner holds it.
    ///
    /// Fails with [`DispatchError::LockContention`] once every attempt has
    /// found the marker present.
    pub fn acquire(
        path: &Path,
        target: &str,
        policy: LockPolicy,
        interrupt: &Interrupt,
    ) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| DispatchError::file_system("create lock directory", parent, e))?;
        }

        for attempt in 0..=policy.attempts {
            if interrupt.is_set() {
                return Err(DispatchError::Interrupted);
            }

            match Self::try_create(path) {
                Ok(lock) => {
                    debug!("Lock acquired: {}", path.display());
                    return Ok(lock);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if attempt == 0 {
                        info!("Another operation on '{}' is in progress. Please wait...", target);
                    }
                    if attempt < policy.attempts {
                        std::thread::sleep(policy.interval);
                    }
                }
                Err(e) => {
                    return Err(DispatchError::file_system("create lock file", path, e));
                }
            }
        }

        Err(DispatchError::LockContention {
            target: target.to_string(),
            lock_path: path.to_path_buf(),
        })
    }

    fn try_create(path: &Path) -> io::Result<Self> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        let lock = Self {
            path: path.to_path_buf(),
        };
        // The guard exists from here on, so a failed write still removes the marker.
        file.write_all(std::process::id().to_string().as_bytes())?;
        Ok(lock)
    }

    /// Location of the marker
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstallLock {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Lock released: {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove lock {}: {}", self.path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::time::Instant;
    use tempfile::TempDir;

    fn quick() -> LockPolicy {
        LockPolicy {
            attempts: 3,
            interval: Duration::from_millis(20),
        }
    }

    #[test]
    fn test_lock_holds_pid_and_releases_on_drop() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("greet.install.lock");

        let lock = InstallLock::acquire(&path, "greet", quick(), &Interrupt::new()).unwrap();
        assert_eq!(
            std::fs::read_to_string(lock.path()).unwrap(),
            std::process::id().to_string()
        );

        drop(lock);
        assert!(!path.exists());
    }

    #[test]
    fn test_contention_times_out() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("greet.install.lock");

        let _held = InstallLock::acquire(&path, "greet", quick(), &Interrupt::new()).unwrap();
        let started = Instant::now();
        let second = InstallLock::acquire(&path, "greet", quick(), &Interrupt::new());

        assert!(matches!(second, Err(DispatchError::LockContention { .. })));
        assert!(started.elapsed() >= Duration::from_millis(60));
        assert!(path.exists());
    }

    #[test]
    fn test_failed_acquire_keeps_the_owner_marker() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("greet.install.lock");

        let held = InstallLock::acquire(&path, "greet", quick(), &Interrupt::new()).unwrap();
        assert!(InstallLock::acquire(&path, "greet", quick(), &Interrupt::new()).is_err());
        assert!(path.exists());
        drop(held);
        assert!(!path.exists());
    }

    #[test]
    fn test_waiter_proceeds_after_release() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("greet.install.lock");
        let held = InstallLock::acquire(&path, "greet", quick(), &Interrupt::new()).unwrap();

        let waiter_path = path.clone();
        let waiter = std::thread::spawn(move || {
            let policy = LockPolicy {
                attempts: 50,
                interval: Duration::from_millis(20),
            };
            InstallLock::acquire(&waiter_path, "greet", policy, &Interrupt::new()).is_ok()
        });

        std::thread::sleep(Duration::from_millis(100));
        drop(held);
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_only_one_concurrent_owner() {
        let temp_dir = TempDir::new().unwrap();
        let path = Arc::new(temp_dir.path().join("greet.install.lock"));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let path = Arc::clone(&path);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    let policy = LockPolicy {
                        attempts: 0,
                        interval: Duration::ZERO,
                    };
                    let lock = InstallLock::acquire(&path, "greet", policy, &Interrupt::new());
                    let won = lock.is_ok();
                    // Hold the lock until every thread has tried.
                    std::thread::sleep(Duration::from_millis(200));
                    drop(lock);
                    won
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_interrupt_stops_waiting() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("greet.install.lock");
        let _held = InstallLock::acquire(&path, "greet", quick(), &Interrupt::new()).unwrap();

        let interrupt = Interrupt::new();
        interrupt.trigger();
        let result = InstallLock::acquire(&path, "greet", quick(), &interrupt);
        assert!(matches!(result, Err(DispatchError::Interrupted)));
    }
}
