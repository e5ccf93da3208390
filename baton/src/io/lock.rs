//! Exclusive per-workspace session lock.
//!
//! Held from before bearings are assembled until the progress entry is written.
//! The lock is an advisory `flock`-style lock on `.baton/session.lock`, so it is
//! released by the OS if the process dies.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;
use tracing::{debug, info};

use crate::session::SessionError;

/// What to do when another session holds the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockMode {
    /// Return [`SessionError::Locked`] immediately.
    #[default]
    FailFast,
    /// Block until the other session releases the lock.
    Wait,
}

/// Guard for the session lock; unlocks on drop.
#[derive(Debug)]
pub struct SessionLock {
    file: File,
    path: PathBuf,
}

impl SessionLock {
    pub fn acquire(path: &Path, mode: LockMode) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create lock dir {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("open lock file {}", path.display()))?;

        match mode {
            LockMode::FailFast => {
                if file.try_lock_exclusive().is_err() {
                    return Err(SessionError::Locked {
                        path: path.to_path_buf(),
                    }
                    .into());
                }
            }
            LockMode::Wait => {
                info!(path = %path.display(), "waiting for session lock");
                file.lock_exclusive()
                    .with_context(|| format!("lock {}", path.display()))?;
            }
        }

        // Holder pid is informational only; the flock is what excludes.
        file.set_len(0)
            .with_context(|| format!("truncate lock file {}", path.display()))?;
        writeln!(file, "{}", std::process::id())
            .with_context(|| format!("write lock file {}", path.display()))?;
        debug!(path = %path.display(), "session lock acquired");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            debug!(path = %self.path.display(), err = %err, "unlock failed");
        } else {
            debug!(path = %self.path.display(), "session lock released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn second_fail_fast_acquire_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(".baton/session.lock");

        let held = SessionLock::acquire(&path, LockMode::FailFast).expect("first");
        let err = SessionLock::acquire(&path, LockMode::FailFast).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SessionError>(),
            Some(SessionError::Locked { .. })
        ));

        drop(held);
        SessionLock::acquire(&path, LockMode::FailFast).expect("after release");
    }

    #[test]
    fn wait_mode_blocks_until_release() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("session.lock");
        let held = SessionLock::acquire(&path, LockMode::FailFast).expect("first");

        let (tx, rx) = mpsc::channel();
        let waiter_path = path.clone();
        let waiter = thread::spawn(move || {
            let _lock = SessionLock::acquire(&waiter_path, LockMode::Wait).expect("wait");
            tx.send(()).expect("send");
        });

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        drop(held);
        rx.recv_timeout(Duration::from_secs(5)).expect("acquired after release");
        waiter.join().expect("join");
    }
}
