//! Single-instance locking.

#[cfg(unix)]
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Why a lock could not be taken.
#[derive(Debug, Error)]
pub enum LockError {
    /// A live process already holds the lock.
    #[error("lock '{}' is held by another process", path.display())]
    AlreadyHeld { path: PathBuf },
    /// Anything else.
    #[error("could not acquire lock '{}': {source}", path.display())]
    Failed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A lock resource keyed by a path and the current process id.
///
/// The returned guard holds the lock until dropped.
pub trait InstanceLock {
    type Guard;

    fn acquire(&mut self, path: &Path, pid: u32) -> Result<Self::Guard, LockError>;
}

/// Pid file locked with `flock`, holding the owner's pid.
///
/// The lock lives as long as this value. Dropping it removes the file.
#[cfg(unix)]
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    // Keeps the descriptor (and with it the flock) open.
    _file: File,
}

#[cfg(unix)]
impl PidFile {
    /// Creates or opens `path`, locks it without blocking and writes `pid`.
    ///
    /// A previous owner removes the file when it lets go, so the file we
    /// locked may already be unlinked. In that case another process can create
    /// and lock a fresh file at `path`; we start over until the locked file is
    /// the one `path` names.
    pub fn acquire(path: &Path, pid: u32) -> Result<Self, LockError> {
        use std::io::{Seek, Write};

        let failed = |source: io::Error| LockError::Failed {
            path: path.to_path_buf(),
            source,
        };

        let mut file = loop {
            let file = Self::open_locked(path)?;
            if Self::is_current(&file, path).map_err(failed)? {
                break file;
            }
            tracing::debug!("pid file {} was replaced while locking, retrying", path.display());
        };

        file.set_len(0).map_err(failed)?;
        file.rewind().map_err(failed)?;
        writeln!(file, "{pid}").map_err(failed)?;
        file.sync_all().map_err(failed)?;

        tracing::debug!("acquired pid file {} for pid {pid}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            _file: file,
        })
    }

    fn open_locked(path: &Path) -> Result<File, LockError> {
        use std::os::unix::fs::OpenOptionsExt;
        use std::os::unix::io::AsRawFd;

        let failed = |source: io::Error| LockError::Failed {
            path: path.to_path_buf(),
            source,
        };

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o644)
            .open(path)
            .map_err(failed)?;

        // LOCK_NB: an instance that is already running must not make us wait.
        if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) } < 0 {
            let err = io::Error::last_os_error();
            return Err(if err.kind() == io::ErrorKind::WouldBlock {
                LockError::AlreadyHeld {
                    path: path.to_path_buf(),
                }
            } else {
                failed(err)
            });
        }

        Ok(file)
    }

    /// Whether `file` is still the file that `path` names.
    fn is_current(file: &File, path: &Path) -> io::Result<bool> {
        use std::os::unix::fs::MetadataExt;

        let locked = file.metadata()?;
        match std::fs::metadata(path) {
            Ok(linked) => Ok(locked.dev() == linked.dev() && locked.ino() == linked.ino()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            tracing::debug!("could not remove pid file {}: {err}", self.path.display());
        }
    }
}

/// The [`InstanceLock`] backed by [`PidFile`].
#[cfg(unix)]
#[derive(Debug, Default, Clone, Copy)]
pub struct PidFileLock;

#[cfg(unix)]
impl InstanceLock for PidFileLock {
    type Guard = PidFile;

    fn acquire(&mut self, path: &Path, pid: u32) -> Result<PidFile, LockError> {
        PidFile::acquire(path, pid)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn writes_pid_and_removes_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.pid");

        let guard = PidFile::acquire(&path, 4242).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "4242\n");
        assert_eq!(guard.path(), path);

        drop(guard);
        assert!(!path.exists());
    }

    #[test]
    fn second_acquire_reports_already_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.pid");

        let _guard = PidFile::acquire(&path, 1).unwrap();
        // flock locks belong to the open file description, so a second open
        // in the same process conflicts too.
        let err = PidFileLock.acquire(&path, 2).unwrap_err();
        assert!(matches!(err, LockError::AlreadyHeld { .. }), "got: {err}");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "1\n");
    }

    #[test]
    fn lock_on_removed_file_is_not_current() {
        use std::os::unix::io::AsRawFd;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.pid");

        // A runs; B opens the file, then A exits and removes it before B locks.
        let a = PidFile::acquire(&path, 1).unwrap();
        let b = std::fs::OpenOptions::new().read(true).write(true).open(&path).unwrap();
        drop(a);
        let rc = unsafe { libc::flock(b.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        assert_eq!(rc, 0);
        assert!(!PidFile::is_current(&b, &path).unwrap());

        // C creates a new file and wins; B starting over must see it held.
        let c = PidFile::acquire(&path, 3).unwrap();
        assert!(PidFile::is_current(&c._file, &path).unwrap());
        let err = PidFile::acquire(&path, 2).unwrap_err();
        assert!(matches!(err, LockError::AlreadyHeld { .. }), "got: {err}");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "3\n");
    }

    #[test]
    fn replaced_file_is_not_current() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.pid");

        let old = PidFile::open_locked(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        std::fs::write(&path, "").unwrap();
        assert!(!PidFile::is_current(&old, &path).unwrap());

        let fresh = PidFile::open_locked(&path).unwrap();
        assert!(PidFile::is_current(&fresh, &path).unwrap());
    }

    #[test]
    fn missing_directory_is_generic_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("app.pid");

        let err = PidFile::acquire(&path, 1).unwrap_err();
        assert!(matches!(err, LockError::Failed { .. }), "got: {err}");
    }
}
