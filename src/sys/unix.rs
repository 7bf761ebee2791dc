use crate::bootstrap::{self, DaemonHandle, Fork, Outcome, ProcessOps};
use crate::daemon::{Daemon, Supervision};
use crate::error::{DaemonError, DaemonResult};
use crate::lock::{PidFile, PidFileLock};
use std::fs::File;
use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::Path;
use std::process::exit;

#[cfg(target_os = "linux")]
use sd_notify::NotifyState;

/// Main entry point for Unix systems.
///
/// Under a service manager (see [`Supervision`]) the process stays in the
/// foreground and signals readiness. Otherwise it double-forks; only the
/// daemon process returns from here; the launcher and the intermediate
/// process exit with a status that reflects the daemon's startup.
pub fn start(daemon: &Daemon) -> DaemonResult<DaemonHandle<PidFile>> {
    let settings = daemon.settings();

    if is_supervised(daemon.supervision()) {
        return start_supervised_mode(&settings);
    }

    match bootstrap::run(&mut UnixProcess, &mut PidFileLock, &settings)? {
        Outcome::Daemon(handle) => Ok(handle),
        Outcome::Exit(Ok(())) => exit(0),
        Outcome::Exit(Err(err)) => {
            eprintln!("{err}");
            exit(1);
        }
    }
}

fn is_supervised(mode: Supervision) -> bool {
    match mode {
        Supervision::Always => true,
        Supervision::Never => false,
        // Systemd sets NOTIFY_SOCKET for Type=notify services.
        Supervision::Auto => std::env::var_os("NOTIFY_SOCKET").is_some(),
    }
}

fn start_supervised_mode(settings: &bootstrap::Settings) -> DaemonResult<DaemonHandle<PidFile>> {
    let handle = bootstrap::run_supervised(&mut UnixProcess, &mut PidFileLock, settings)?;

    // 'true' unsets NOTIFY_SOCKET so it does not leak to children.
    #[cfg(target_os = "linux")]
    if let Err(err) = sd_notify::notify(true, &[NotifyState::Ready]) {
        tracing::warn!("could not notify service manager: {err}");
    }

    Ok(handle)
}

/// The real process operations.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct UnixProcess;

impl ProcessOps for UnixProcess {
    type Reader = File;
    type Writer = File;

    fn status_channel(&mut self) -> io::Result<(File, File)> {
        let mut fds: [RawFd; 2] = [-1; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } < 0 {
            return Err(io::Error::last_os_error());
        }

        // SAFETY: pipe() just returned two fresh descriptors we own.
        let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
        set_cloexec(&read)?;
        set_cloexec(&write)?;

        Ok((File::from(read), File::from(write)))
    }

    fn fork(&mut self) -> DaemonResult<Fork> {
        match unsafe { libc::fork() } {
            pid if pid < 0 => Err(DaemonError::last_syscall("fork")),
            0 => Ok(Fork::Child),
            pid => Ok(Fork::Parent(pid as u32)),
        }
    }

    fn wait_for(&mut self, child: u32) {
        loop {
            let rc = unsafe { libc::waitpid(child as libc::pid_t, std::ptr::null_mut(), 0) };
            if rc >= 0 || io::Error::last_os_error().kind() != io::ErrorKind::Interrupted {
                break;
            }
        }
    }

    fn change_directory(&mut self, dir: &Path) -> io::Result<()> {
        std::env::set_current_dir(dir)
    }

    fn new_session(&mut self, umask: u32) -> DaemonResult<()> {
        if unsafe { libc::setsid() } < 0 {
            return Err(DaemonError::last_syscall("setsid"));
        }
        unsafe { libc::umask(umask as libc::mode_t) };
        Ok(())
    }

    fn redirect_stdio(&mut self, log: &File) -> io::Result<()> {
        let null = File::open("/dev/null")?;
        redirect_stream(null.as_raw_fd(), libc::STDIN_FILENO)?;
        redirect_stream(log.as_raw_fd(), libc::STDOUT_FILENO)?;
        redirect_stream(log.as_raw_fd(), libc::STDERR_FILENO)
    }

    fn pid(&self) -> u32 {
        std::process::id()
    }
}

fn set_cloexec(fd: &OwnedFd) -> io::Result<()> {
    let raw = fd.as_raw_fd();
    let flags = unsafe { libc::fcntl(raw, libc::F_GETFD) };
    if flags < 0 || unsafe { libc::fcntl(raw, libc::F_SETFD, flags | libc::FD_CLOEXEC) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn redirect_stream(source: RawFd, target: RawFd) -> io::Result<()> {
    loop {
        if unsafe { libc::dup2(source, target) } == target {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}
