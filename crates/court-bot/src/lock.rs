//! Single-instance process lock.
//!
//! Atomic directory creation on a well-known path: the second invocation
//! of the same process kind sees EEXIST and exits immediately. The lock
//! is released on drop; a stale lock from a crashed process is broken
//! once it outlives the watchdog's staleness threshold.

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use tracing::{info, warn};

/// Held for the lifetime of one tick.
pub struct TickLock {
    path: PathBuf,
}

impl TickLock {
    /// Try to acquire. `None` means another instance holds the lock.
    pub fn acquire(path: PathBuf, stale_after: Duration) -> Option<Self> {
        match std::fs::create_dir(&path) {
            Ok(()) => Some(Self { path }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                // Break locks older than the staleness threshold; a tick
                // that old is dead, not slow.
                if let Ok(meta) = std::fs::metadata(&path) {
                    let age = meta
                        .modified()
                        .ok()
                        .and_then(|m| SystemTime::now().duration_since(m).ok());
                    if age.is_some_and(|a| a > stale_after) {
                        warn!(path = %path.display(), "Breaking stale tick lock");
                        let _ = std::fs::remove_dir(&path);
                        return match std::fs::create_dir(&path) {
                            Ok(()) => Some(Self { path }),
                            Err(_) => None,
                        };
                    }
                }
                info!(path = %path.display(), "Another instance holds the lock, exiting");
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Lock acquisition failed");
                None
            }
        }
    }
}

impl Drop for TickLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Lock release failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exclusive_acquisition() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".tick.lock");
        let stale = Duration::from_secs(3600);

        let first = TickLock::acquire(path.clone(), stale);
        assert!(first.is_some());
        // Second acquisition fails while held.
        assert!(TickLock::acquire(path.clone(), stale).is_none());

        drop(first);
        // Released on drop.
        assert!(TickLock::acquire(path, stale).is_some());
    }

    #[test]
    fn test_stale_lock_is_broken() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".tick.lock");
        std::fs::create_dir(&path).unwrap();

        // Zero threshold: the existing lock is immediately stale.
        let lock = TickLock::acquire(path, Duration::from_secs(0));
        assert!(lock.is_some());
    }
}
