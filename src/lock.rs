//! Project file lock: serializes concurrent `apply` operations against the
//! same project root across processes, not just within this one.
//!
//! Implemented as an exclusive create of `.dedup.lock` rather than an
//! flock/fcntl advisory lock, since the applicator only needs to exclude
//! other dedup-engine invocations, not arbitrary third-party processes,
//! and `create_new` is portable across the target platforms without a
//! platform-specific lock crate.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::errors::{DedupError, Result};

const LOCK_FILE_NAME: &str = ".dedup.lock";

/// Held for the duration of one apply transaction. Dropping it removes the
/// lock file, including on an early return from an error.
pub struct ProjectLock {
    path: PathBuf,
}

impl ProjectLock {
    /// Attempt to acquire the lock for `project_root`. Returns
    /// `DedupError::Cancelled`-free `Busy`-style error when another
    /// operation already holds it (callers decide whether to block or
    /// bail per the applicator's Scenario E policy).
    pub fn try_acquire(project_root: &Path) -> Result<Self> {
        let path = project_root.join(LOCK_FILE_NAME);
        match std::fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                use std::io::Write;
                let _ = writeln!(file, "{}", std::process::id());
                Ok(Self { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(DedupError::InvalidInput {
                    message: format!("project is locked by another apply operation: {}", path.display()),
                    field: Some("project_root".to_string()),
                })
            }
            Err(e) => Err(DedupError::io(format!("failed to create lock file at {}", path.display()), e)),
        }
    }

    /// Poll for the lock, retrying with a short backoff up to `attempts`
    /// times. Used by callers that want to block rather than fail fast.
    pub async fn acquire_blocking(project_root: &Path, attempts: usize) -> Result<Self> {
        let mut last_err = None;
        for attempt in 0..attempts {
            match Self::try_acquire(project_root) {
                Ok(lock) => return Ok(lock),
                Err(e) => {
                    last_err = Some(e);
                    tokio::time::sleep(std::time::Duration::from_millis(50 * (attempt as u64 + 1))).await;
                }
            }
        }
        Err(last_err.unwrap_or_else(|| DedupError::internal("lock acquisition failed with no recorded error")))
    }
}

impl Drop for ProjectLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove project lock file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_while_first_is_held() {
        let tmp = tempfile::tempdir().unwrap();
        let first = ProjectLock::try_acquire(tmp.path()).unwrap();
        let second = ProjectLock::try_acquire(tmp.path());
        assert!(second.is_err());
        drop(first);
        assert!(ProjectLock::try_acquire(tmp.path()).is_ok());
    }

    #[test]
    fn dropping_lock_removes_file() {
        let tmp = tempfile::tempdir().unwrap();
        let lock_path = tmp.path().join(".dedup.lock");
        {
            let _lock = ProjectLock::try_acquire(tmp.path()).unwrap();
            assert!(lock_path.exists());
        }
        assert!(!lock_path.exists());
    }
}
