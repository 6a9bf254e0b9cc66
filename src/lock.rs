//! Per-device build lock.
//!
//! Two runs against the same device share one source and output tree, so
//! only one may hold `<root>/build/.<device>.lock` at a time. The lock is
//! advisory (`flock`) and released when the guard is dropped.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum LockError {
    #[error("another build holds {path} (waited {waited:?})")]
    Busy { path: PathBuf, waited: Duration },

    #[error("failed to open lock file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Held for the duration of a build.
pub struct BuildLock {
    path: PathBuf,
    file: File,
}

impl BuildLock {
    /// Take the lock without waiting.
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        Self::acquire_with_timeout(path, Duration::ZERO)
    }

    /// Take the lock, polling for up to `timeout` while another process holds it.
    pub fn acquire_with_timeout(path: &Path, timeout: Duration) -> Result<Self, LockError> {
        let io_err = |source| LockError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let start = Instant::now();
        let poll = Duration::from_millis(50);
        loop {
            match try_lock(path) {
                Ok(file) => {
                    debug!(path = %path.display(), "build lock acquired");
                    return Ok(Self {
                        path: path.to_path_buf(),
                        file,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if start.elapsed() >= timeout {
                        warn!(path = %path.display(), "build lock is held by another run");
                        return Err(LockError::Busy {
                            path: path.to_path_buf(),
                            waited: start.elapsed(),
                        });
                    }
                }
                Err(e) => return Err(io_err(e)),
            }
            std::thread::sleep(poll);
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
fn try_lock(path: &Path) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    use std::os::unix::io::AsRawFd;

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .mode(0o644)
        .open(path)?;

    let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if result == 0 {
        return Ok(file);
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
        Err(io::Error::new(io::ErrorKind::WouldBlock, "lock held"))
    } else {
        Err(err)
    }
}

#[cfg(not(unix))]
fn try_lock(path: &Path) -> io::Result<File> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => Ok(file),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            Err(io::Error::new(io::ErrorKind::WouldBlock, "lock held"))
        }
        Err(e) => Err(e),
    }
}

impl Drop for BuildLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            unsafe {
                libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
            }
        }
        #[cfg(not(unix))]
        {
            let _ = fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_creates_parent() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("build").join(".mido.lock");

        let lock = BuildLock::acquire(&path).unwrap();
        assert!(path.exists());
        assert_eq!(lock.path(), path);
    }

    #[test]
    fn test_released_on_drop() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(".mido.lock");

        {
            let _lock = BuildLock::acquire(&path).unwrap();
        }
        let _again = BuildLock::acquire(&path).unwrap();
    }

    #[test]
    #[cfg(unix)]
    fn test_second_holder_fails_fast() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(".whyred.lock");
        let other = path.clone();

        let _held = BuildLock::acquire(&path).unwrap();
        // flock locks belong to the open file description, so a second open
        // in another thread contends like another process would
        let result = std::thread::spawn(move || BuildLock::acquire(&other).map(|_| ()))
            .join()
            .unwrap();
        assert!(matches!(result, Err(LockError::Busy { .. })));
    }

    #[test]
    fn test_different_devices_do_not_contend() {
        let temp = TempDir::new().unwrap();
        let _mido = BuildLock::acquire(&temp.path().join(".mido.lock")).unwrap();
        let _whyred = BuildLock::acquire(&temp.path().join(".whyred.lock")).unwrap();
    }
}
