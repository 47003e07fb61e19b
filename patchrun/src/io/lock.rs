//! Per-change-id advisory lock.
//!
//! Exactly one workspace may exist per change identifier at a time. The lock
//! is an exclusive `flock` on `<workspaces>/<change_id>.lock`, held for the
//! lifetime of the guard and released on drop. The OS releases the lock when
//! the holding process dies, so a leftover lock file from a killed run is
//! harmless: acquisition only fails while a live holder exists.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use fs2::FileExt;
use tracing::debug;

/// Scoped exclusive lock on one change identifier.
#[derive(Debug)]
pub struct ChangeLock {
    file: File,
    path: PathBuf,
}

impl ChangeLock {
    /// Acquire the lock, failing immediately if another run holds it.
    pub fn acquire(dir: &Path, change_id: &str) -> Result<Self> {
        fs::create_dir_all(dir).with_context(|| format!("create lock dir {}", dir.display()))?;
        let path = dir.join(format!("{change_id}.lock"));
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("open lock file {}", path.display()))?;
        file.try_lock_exclusive().map_err(|_| {
            anyhow!("change '{change_id}' is already in use by another run (lock held)")
        })?;
        debug!(path = %path.display(), "change lock acquired");
        Ok(Self { file, path })
    }
}

impl Drop for ChangeLock {
    fn drop(&mut self) {
        // Explicit unlock; closing the descriptor would release it anyway.
        let _ = FileExt::unlock(&self.file);
        debug!(path = %self.path.display(), "change lock released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquisition_fails_while_held() {
        let temp = tempfile::tempdir().expect("tempdir");
        let lock = ChangeLock::acquire(temp.path(), "chg-1").expect("first lock");

        let err = ChangeLock::acquire(temp.path(), "chg-1").expect_err("second lock should fail");
        assert!(err.to_string().contains("already in use"));

        drop(lock);
        ChangeLock::acquire(temp.path(), "chg-1").expect("lock after release");
    }

    #[test]
    fn different_change_ids_do_not_contend() {
        let temp = tempfile::tempdir().expect("tempdir");
        let _a = ChangeLock::acquire(temp.path(), "chg-a").expect("lock a");
        let _b = ChangeLock::acquire(temp.path(), "chg-b").expect("lock b");
    }

    #[test]
    fn stale_lock_file_is_acquirable() {
        let temp = tempfile::tempdir().expect("tempdir");
        {
            let _lock = ChangeLock::acquire(temp.path(), "chg-1").expect("lock");
        }
        // The file persists, the lock does not.
        assert!(temp.path().join("chg-1.lock").exists());
        ChangeLock::acquire(temp.path(), "chg-1").expect("reacquire");
    }
}
