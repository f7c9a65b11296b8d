//! Advisory writer lock.
//!
//! One orchestrator per store root: a `.lock` file holding the owner's pid
//! and start time. Readers never touch it. A lock whose owner process is
//! gone is stale; the orchestrator breaks it only after startup
//! reconciliation has completed.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{KdbError, Result};
use crate::store::StoreLayout;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub started_at: String,
}

/// Outcome of a lock attempt.
#[derive(Debug)]
pub enum LockState {
    Acquired(StoreLock),
    /// A live process holds the lock.
    Held(LockInfo),
    /// The lock file exists but its owner is gone.
    Stale(LockInfo),
}

/// RAII guard over the lockfile; removes it on drop.
#[derive(Debug)]
pub struct StoreLock {
    path: PathBuf,
}

impl StoreLock {
    /// Try to take the lock. Never blocks.
    pub fn try_acquire(layout: &StoreLayout) -> Result<LockState> {
        let path = layout.lock_path();
        fs::create_dir_all(&layout.db_root)
            .map_err(|e| KdbError::store("lock", &layout.db_root, e))?;

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                let info = LockInfo {
                    pid: std::process::id(),
                    started_at: chrono::Local::now().to_rfc3339(),
                };
                let body = serde_json::to_string(&info)
                    .map_err(|e| KdbError::store("lock", &path, e))?;
                file.write_all(body.as_bytes())
                    .map_err(|e| KdbError::store("lock", &path, e))?;
                Ok(LockState::Acquired(StoreLock { path }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let info = read_lock_info(&path)?;
                if process_alive(info.pid) {
                    Ok(LockState::Held(info))
                } else {
                    Ok(LockState::Stale(info))
                }
            }
            Err(e) => Err(KdbError::store("lock", &path, e)),
        }
    }

    /// Remove a lockfile previously observed as stale.
    pub fn break_stale(layout: &StoreLayout) -> Result<()> {
        let path = layout.lock_path();
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(KdbError::store("lock", &path, e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn read_lock_info(path: &Path) -> Result<LockInfo> {
    let body = fs::read_to_string(path).map_err(|e| KdbError::store("lock", path, e))?;
    serde_json::from_str(&body).map_err(|e| KdbError::store("lock", path, e))
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

/// Liveness cannot be checked portably; assume alive so we never break a
/// lock that might still be held.
#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}
