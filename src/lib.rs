//! # daemonlib
//!
//! Foundation pieces for a long-running background service:
//!
//! - [`Daemon`] detaches the process with a double fork and does not let the
//!   launcher exit until the daemon has taken its pid file lock, opened its
//!   log and redirected its standard streams. A second instance is refused
//!   with "already running".
//! - [`ConfFile`] reads and rewrites human-edited `key = value` files while
//!   preserving comments, blank lines and unparsable lines, and replaces the
//!   file on disk without ever leaving it half-written.
//!
//! ```no_run
//! use daemonlib::{ConfFile, Daemon};
//!
//! let conf = ConfFile::read("/etc/brickd.conf")?;
//! let handle = Daemon::from_conf("brickd", &conf).build()?.start()?;
//! // Only the daemon gets here, with stdout/stderr going to the log file.
//! # drop(handle);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod bootstrap;
pub mod conf_file;
mod daemon;
mod error;
pub mod escape;
pub mod line;
pub mod lock;
mod replace;
pub mod status;
mod sys;

// Re-export public types to keep the API flat
pub use bootstrap::DaemonHandle;
pub use conf_file::{ConfFile, ReadWarning, WarningKind};
pub use daemon::{Daemon, Supervision};
pub use error::{ConfError, ConfResult, DaemonError, DaemonResult};
pub use line::ConfLine;
#[cfg(unix)]
pub use lock::PidFile;
pub use lock::{InstanceLock, LockError};
pub use status::StartupStatus;
