//! The double-fork startup sequence as a state machine.
//!
//! ```text
//! launcher ──fork──► intermediate ──chdir, setsid, umask──fork──► daemon
//!    │                    │                                          │
//!    │                    └─ exits at once                           │
//!    └─ reaps intermediate, blocks on the status pipe ◄── 1 byte ────┘
//! ```
//!
//! The daemon takes the instance lock, opens the log, redirects stdio and
//! reports one status byte: `1` running, `2` already running, `0` failed. The
//! launcher exits successfully only on `1`, so whoever started it knows the
//! daemon is really up once the launcher returns.
//!
//! All process operations go through [`ProcessOps`] and the lock through
//! [`InstanceLock`], so every branch can be driven without forking.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{DaemonError, DaemonResult};
use crate::lock::{InstanceLock, LockError};
use crate::status::{self, StartupStatus};

/// Result of a fork, seen from the calling process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fork {
    Parent(u32),
    Child,
}

/// The process-level operations the startup sequence needs.
pub trait ProcessOps {
    type Reader: Read;
    type Writer: Write;

    /// Opens the one-shot status channel.
    fn status_channel(&mut self) -> io::Result<(Self::Reader, Self::Writer)>;
    fn fork(&mut self) -> DaemonResult<Fork>;
    /// Blocks until `child` has terminated, retrying on interruption.
    fn wait_for(&mut self, child: u32);
    fn change_directory(&mut self, dir: &Path) -> io::Result<()>;
    /// Detaches from the controlling terminal and sets the file mode mask.
    fn new_session(&mut self, umask: u32) -> DaemonResult<()>;
    /// Points stdin at a discard source and stdout/stderr at `log`.
    fn redirect_stdio(&mut self, log: &File) -> io::Result<()>;
    fn pid(&self) -> u32;
}

/// What the startup sequence needs to know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub pid_file: PathBuf,
    pub log_file: PathBuf,
    pub working_directory: PathBuf,
    pub umask: u32,
}

/// The running daemon's context: the held lock and the log destination.
#[derive(Debug)]
pub struct DaemonHandle<G> {
    lock: G,
    log: File,
}

impl<G> DaemonHandle<G> {
    pub fn lock(&self) -> &G {
        &self.lock
    }

    /// The log file that stdout and stderr now point at.
    pub fn log(&self) -> &File {
        &self.log
    }

    pub fn into_parts(self) -> (G, File) {
        (self.lock, self.log)
    }
}

/// What the current process does after [`run`] returns.
#[derive(Debug)]
pub enum Outcome<G> {
    /// This process is the daemon and keeps running.
    Daemon(DaemonHandle<G>),
    /// This process must terminate; `Ok` means a success exit code.
    Exit(DaemonResult<()>),
}

struct SetupFailure {
    status: StartupStatus,
    error: DaemonError,
}

impl SetupFailure {
    fn failed(error: impl Into<DaemonError>) -> Self {
        Self {
            status: StartupStatus::Failed,
            error: error.into(),
        }
    }
}

/// Lock, log, redirection. Shared by the forked and the supervised paths.
fn setup<P, L>(
    ops: &mut P,
    lock: &mut L,
    settings: &Settings,
) -> Result<DaemonHandle<L::Guard>, SetupFailure>
where
    P: ProcessOps,
    L: InstanceLock,
{
    let guard = lock
        .acquire(&settings.pid_file, ops.pid())
        .map_err(|err| {
            tracing::error!("{err}");
            match err {
                LockError::AlreadyHeld { path } => SetupFailure {
                    status: StartupStatus::AlreadyRunning,
                    error: DaemonError::AlreadyRunning { pid_file: path },
                },
                other => SetupFailure::failed(DaemonError::Lock(other)),
            }
        })?;

    let log = OpenOptions::new()
        .read(true)
        .append(true)
        .create(true)
        .open(&settings.log_file)
        .map_err(|err| {
            tracing::error!("could not open log file '{}': {err}", settings.log_file.display());
            SetupFailure::failed(err)
        })?;

    ops.redirect_stdio(&log).map_err(|err| {
        tracing::error!("could not redirect standard streams: {err}");
        SetupFailure::failed(err)
    })?;

    Ok(DaemonHandle { lock: guard, log })
}

/// Runs the double-fork sequence.
///
/// `Err` means nothing was forked (the channel or the first fork failed) and
/// the caller is still the only process. Otherwise every process that comes
/// out of the sequence gets an [`Outcome`].
pub fn run<P, L>(
    ops: &mut P,
    lock: &mut L,
    settings: &Settings,
) -> DaemonResult<Outcome<L::Guard>>
where
    P: ProcessOps,
    L: InstanceLock,
{
    let (mut reader, mut writer) = ops.status_channel()?;

    if let Fork::Parent(child) = ops.fork()? {
        drop(writer);
        // Reap the intermediate process so it does not linger as a zombie.
        ops.wait_for(child);
        let received = status::read_status(&mut reader);
        tracing::debug!("launcher received status {received:?}");
        return Ok(Outcome::Exit(status::interpret_status(received, &settings.pid_file)));
    }
    drop(reader);

    // Intermediate. Failing here closes the channel without a status byte.
    if let Err(err) = ops.change_directory(&settings.working_directory) {
        tracing::error!(
            "could not change directory to '{}': {err}",
            settings.working_directory.display()
        );
        return Ok(Outcome::Exit(Err(err.into())));
    }
    if let Err(err) = ops.new_session(settings.umask) {
        return Ok(Outcome::Exit(Err(err)));
    }

    match ops.fork() {
        Err(err) => return Ok(Outcome::Exit(Err(err))),
        Ok(Fork::Parent(_)) => return Ok(Outcome::Exit(Ok(()))),
        Ok(Fork::Child) => {}
    }

    // Daemon.
    let result = setup(ops, lock, settings);
    let status = match &result {
        Ok(_) => StartupStatus::Running,
        Err(failure) => failure.status,
    };

    if let Err(err) = status::write_status(&mut writer, status) {
        tracing::error!("could not write to status pipe: {err}");
    }
    drop(writer);

    Ok(match result {
        Ok(handle) => Outcome::Daemon(handle),
        Err(failure) => Outcome::Exit(Err(failure.error)),
    })
}

/// Runs the setup steps in the current process, for service managers that
/// keep their services in the foreground.
pub fn run_supervised<P, L>(
    ops: &mut P,
    lock: &mut L,
    settings: &Settings,
) -> DaemonResult<DaemonHandle<L::Guard>>
where
    P: ProcessOps,
    L: InstanceLock,
{
    ops.change_directory(&settings.working_directory)?;
    setup(ops, lock, settings).map_err(|failure| failure.error)
}
