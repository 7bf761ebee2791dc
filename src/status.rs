//! The one-byte startup status sent from the daemon back to its launcher.

use std::io::{self, Read, Write};
use std::path::Path;

use crate::error::{DaemonError, DaemonResult};

/// Startup outcome reported by the final daemon process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StartupStatus {
    /// Lock, log or redirection setup failed.
    Failed = 0,
    /// The daemon is up and owns the lock.
    Running = 1,
    /// Another live process holds the lock.
    AlreadyRunning = 2,
}

impl StartupStatus {
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Reads exactly one status byte, retrying on `EINTR`.
///
/// Returns `Ok(None)` when the writer closed the channel without sending.
pub fn read_status<R: Read>(reader: &mut R) -> io::Result<Option<u8>> {
    let mut byte = [0u8; 1];
    loop {
        match reader.read(&mut byte) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(byte[0])),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
}

/// Sends the status byte. `write_all` already retries on `EINTR`.
pub fn write_status<W: Write>(writer: &mut W, status: StartupStatus) -> io::Result<()> {
    writer.write_all(&[status.as_byte()])?;
    writer.flush()
}

/// Maps what the launcher read from the channel to its exit result.
///
/// Only status `1` is success. `pid_file` names the lock in the
/// "already running" diagnostic.
pub fn interpret_status(received: io::Result<Option<u8>>, pid_file: &Path) -> DaemonResult<()> {
    match received {
        Err(err) => Err(DaemonError::Channel(err.to_string())),
        Ok(None) => Err(DaemonError::Channel(
            "daemon process exited before reporting its status".to_owned(),
        )),
        Ok(Some(1)) => Ok(()),
        Ok(Some(2)) => Err(DaemonError::AlreadyRunning {
            pid_file: pid_file.to_path_buf(),
        }),
        Ok(Some(status)) => Err(DaemonError::StartupFailed { status }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Interrupting<'a> {
        interrupted: bool,
        inner: &'a [u8],
    }

    impl Read for Interrupting<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(io::Error::from(io::ErrorKind::Interrupted));
            }
            self.inner.read(buf)
        }
    }

    #[test]
    fn reads_single_byte_after_interrupt() {
        let mut reader = Interrupting {
            interrupted: false,
            inner: &[2, 9],
        };
        assert_eq!(read_status(&mut reader).unwrap(), Some(2));
    }

    #[test]
    fn closed_channel_reads_none() {
        let mut empty: &[u8] = &[];
        assert_eq!(read_status(&mut empty).unwrap(), None);
    }

    #[test]
    fn writes_status_byte() {
        let mut out = Vec::new();
        write_status(&mut out, StartupStatus::AlreadyRunning).unwrap();
        assert_eq!(out, [2]);
    }

    #[test]
    fn status_mapping() {
        let pid = Path::new("/run/app.pid");

        assert!(interpret_status(Ok(Some(1)), pid).is_ok());

        let err = interpret_status(Ok(Some(2)), pid).unwrap_err();
        assert!(matches!(err, DaemonError::AlreadyRunning { .. }));
        assert_eq!(err.to_string(), "already running according to '/run/app.pid'");

        let err = interpret_status(Ok(Some(0)), pid).unwrap_err();
        assert!(matches!(err, DaemonError::StartupFailed { status: 0 }));

        let err = interpret_status(Ok(None), pid).unwrap_err();
        assert!(matches!(err, DaemonError::Channel(_)));

        let err = interpret_status(Err(io::Error::from(io::ErrorKind::BrokenPipe)), pid);
        assert!(matches!(err, Err(DaemonError::Channel(_))));
    }
}
