// src/db/lock.rs

//! Cross-process exclusive lock for database writes
//!
//! Every mutating database operation runs while holding an advisory
//! `flock` on `<db>.lock`. Contention is retried with exponential backoff;
//! once the retries run out the caller gets `Error::DatabaseLockTimeout`.

use crate::config::LocksSection;
use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Held exclusive lock; released on drop
#[derive(Debug)]
pub struct DbLock {
    file: File,
    path: PathBuf,
}

fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

impl DbLock {
    /// Acquire the lock, retrying with backoff while another holder has it
    pub fn acquire(path: &Path, settings: &LocksSection) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|e| Error::IoError(format!("Failed to open lock file {}: {}", path.display(), e)))?;

        let mut delay = settings.initial_backoff();
        for attempt in 1..=settings.retries {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    if attempt > 1 {
                        debug!("Acquired {} after {} attempts", path.display(), attempt);
                    }
                    return Ok(Self {
                        file,
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if is_contended(&e) => {
                    if attempt < settings.retries {
                        debug!(
                            "Database lock {} busy, retrying in {:?}",
                            path.display(),
                            delay
                        );
                        std::thread::sleep(delay);
                        delay = delay.saturating_mul(2);
                    }
                }
                Err(e) => {
                    return Err(Error::IoError(format!(
                        "Failed to lock {}: {}",
                        path.display(),
                        e
                    )));
                }
            }
        }

        warn!(
            "Gave up on database lock {} after {} attempts",
            path.display(),
            settings.retries
        );
        Err(Error::DatabaseLockTimeout {
            path: path.to_path_buf(),
            attempts: settings.retries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DbLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("Failed to release {}: {}", self.path.display(), e);
        }
    }
}
