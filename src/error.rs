use std::collections::TryReserveError;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while reading, writing or editing a `.conf` file.
///
/// Parser warnings (missing name, missing `=`, overlong line) are not errors;
/// they are reported through the warning callback and the read continues.
#[derive(Debug, Error)]
pub enum ConfError {
    /// A stream or file operation failed.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    /// Growing a buffer or the line store failed.
    #[error("out of memory")]
    OutOfMemory,

    /// A byte outside printable ASCII appeared in an option line.
    #[error("line {line}: invalid character 0x{byte:02X}")]
    InvalidCharacter { line: usize, byte: u8 },

    /// A malformed, truncated or forbidden (`\x00`) escape sequence.
    #[error("line {line}: invalid escape sequence")]
    InvalidEscape { line: usize },

    /// A sibling path (`<path>.new` / `<path>.old`) would be too long.
    #[error("file name too long: {path}")]
    NameTooLong { path: PathBuf },
}

impl From<TryReserveError> for ConfError {
    fn from(_: TryReserveError) -> Self {
        ConfError::OutOfMemory
    }
}

/// Convenience constructor for [`ConfError::Io`].
pub(crate) fn io_err(context: impl Into<String>, source: io::Error) -> ConfError {
    ConfError::Io {
        context: context.into(),
        source,
    }
}

/// A specialized Result type for conf file operations.
pub type ConfResult<T> = Result<T, ConfError>;

/// Errors surfaced by the daemon bootstrap.
///
/// Once the process has forked, failures in the detached generations are
/// funneled into a single status byte; the launching process turns that byte
/// back into one of these variants.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Standard IO errors (pipe creation, log file, redirection).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The single-instance lock is held by another live process.
    #[error("already running according to '{}'", pid_file.display())]
    AlreadyRunning { pid_file: PathBuf },

    /// The lock resource failed for a reason other than contention.
    #[error(transparent)]
    Lock(crate::lock::LockError),

    /// The final process reported a status other than "running".
    #[error("daemon process exited with an error (status: {status})")]
    StartupFailed { status: u8 },

    /// The status byte never arrived or the channel broke.
    #[error("could not read from status pipe: {0}")]
    Channel(String),

    /// A system call failed (fork, setsid, chdir, dup2).
    #[error("syscall '{call}' failed with errno {errno}")]
    Syscall { call: &'static str, errno: i32 },

    /// Reading daemon settings from a conf file failed.
    #[error("configuration error: {0}")]
    Conf(#[from] ConfError),
}

impl DaemonError {
    /// Captures `errno` right after a failed libc call.
    #[cfg(unix)]
    pub(crate) fn last_syscall(call: &'static str) -> Self {
        DaemonError::Syscall {
            call,
            errno: io::Error::last_os_error().raw_os_error().unwrap_or(0),
        }
    }
}

/// A specialized Result type for daemon operations.
pub type DaemonResult<T> = Result<T, DaemonError>;
