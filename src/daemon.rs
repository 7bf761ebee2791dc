use std::path::{Path, PathBuf};

#[cfg(unix)]
use crate::bootstrap::DaemonHandle;
use crate::bootstrap::Settings;
use crate::conf_file::ConfFile;
use crate::error::{DaemonError, DaemonResult};
#[cfg(unix)]
use crate::lock::PidFile;

/// Whether to stay in the foreground for a service manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Supervision {
    /// Stay in the foreground when `NOTIFY_SOCKET` is set (systemd).
    #[default]
    Auto,
    /// Always stay in the foreground.
    Always,
    /// Always double-fork.
    Never,
}

/// Configures and launches the daemon process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Daemon {
    name: String,
    pid_file: PathBuf,
    log_file: PathBuf,
    directory: PathBuf,
    umask: u32,
    supervision: Supervision,
}

impl Daemon {
    /// Creates a configuration for the daemon called `name`.
    ///
    /// # Defaults
    /// - Pid file: `<tmp>/<name>.pid`
    /// - Log file: `<tmp>/<name>.log`
    /// - Working directory: `/`
    /// - Umask: `0`
    pub fn new(name: &str) -> Self {
        let tmp = std::env::temp_dir();
        Daemon {
            name: name.to_owned(),
            pid_file: tmp.join(format!("{name}.pid")),
            log_file: tmp.join(format!("{name}.log")),
            directory: PathBuf::from("/"),
            umask: 0,
            supervision: Supervision::Auto,
        }
    }

    /// Creates a configuration from the `pid_file`, `log_file` and
    /// `working_directory` options of `conf`, falling back to the defaults of
    /// [`Daemon::new`] for missing ones.
    pub fn from_conf(name: &str, conf: &ConfFile) -> Self {
        let mut daemon = Daemon::new(name);
        if let Some(path) = conf.get_str("pid_file").filter(|v| !v.is_empty()) {
            daemon.pid_file = PathBuf::from(path);
        }
        if let Some(path) = conf.get_str("log_file").filter(|v| !v.is_empty()) {
            daemon.log_file = PathBuf::from(path);
        }
        if let Some(path) = conf.get_str("working_directory").filter(|v| !v.is_empty()) {
            daemon.directory = PathBuf::from(path);
        }
        daemon
    }

    // --- Public Getters ---

    pub fn get_name(&self) -> &str {
        &self.name
    }

    pub fn pid_file_path(&self) -> &Path {
        &self.pid_file
    }

    pub fn log_file_path(&self) -> &Path {
        &self.log_file
    }

    pub fn working_directory_path(&self) -> &Path {
        &self.directory
    }

    pub fn supervision(&self) -> Supervision {
        self.supervision
    }

    // --- Builder Methods ---

    /// Sets the pid file used as the single-instance lock.
    pub fn pid_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.pid_file = path.into();
        self
    }

    /// Sets the file that stdout and stderr are appended to.
    pub fn log_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.log_file = path.into();
        self
    }

    /// Sets the directory the daemon changes into after the first fork.
    pub fn working_directory<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.directory = path.into();
        self
    }

    /// Sets the file mode creation mask applied with the new session.
    pub fn umask(mut self, mask: u32) -> Self {
        self.umask = mask;
        self
    }

    pub fn supervised(mut self, mode: Supervision) -> Self {
        self.supervision = mode;
        self
    }

    /// Validates configuration without starting the daemon.
    /// Checks that the pid file and log file directories exist.
    pub fn build(self) -> DaemonResult<Self> {
        for (what, path) in [("pid file", &self.pid_file), ("log file", &self.log_file)] {
            if path.parent().is_some_and(|p| !p.as_os_str().is_empty() && !p.exists()) {
                return Err(DaemonError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{what} directory of '{}' does not exist", path.display()),
                )));
            }
        }
        Ok(self)
    }

    pub(crate) fn settings(&self) -> Settings {
        Settings {
            pid_file: self.pid_file.clone(),
            log_file: self.log_file.clone(),
            working_directory: self.directory.clone(),
            umask: self.umask,
        }
    }

    /// Starts the daemon.
    ///
    /// Returns `Err` if startup failed before the first fork. Otherwise only
    /// the daemon process returns, holding the pid file lock and the log file;
    /// the launching process exits with success once the daemon reports that
    /// it is running, or prints the reason and exits with failure.
    #[cfg(unix)]
    pub fn start(&self) -> DaemonResult<DaemonHandle<PidFile>> {
        tracing::debug!("starting daemon {}", self.name);
        crate::sys::unix::start(self)
    }
}
