//! Filesystem lock serializing cache runs across processes.
//!
//! A lockfile is created with `O_EXCL` semantics; whoever creates it owns
//! the iteration. The holder PID is written into the file for diagnostics.
//! A crashed holder leaves the file behind and requires manual removal.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::warn;

/// RAII guard; the lockfile is removed on drop.
#[derive(Debug)]
pub struct CacheLock {
    path: PathBuf,
}

/// Outcome of a lock attempt. Contention is an expected state, not an
/// error: the caller skips the iteration and logs.
#[derive(Debug)]
pub enum LockAttempt {
    Acquired(CacheLock),
    Held,
}

impl CacheLock {
    pub fn acquire(path: &Path) -> std::io::Result<LockAttempt> {
        match fs::File::create_new(path) {
            Ok(mut file) => {
                let _ = writeln!(file, "{}", std::process::id());
                Ok(LockAttempt::Acquired(CacheLock {
                    path: path.to_path_buf(),
                }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(LockAttempt::Held),
            Err(e) => Err(e),
        }
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("failed to release lock {}: {e}", self.path.display());
        }
    }
}
