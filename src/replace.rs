//! Crash-tolerant file replacement through `<path>.new` and `<path>.old`.
//!
//! The sequence is: write `<path>.new`, rename `<path>` to `<path>.old`,
//! rename `<path>.new` to `<path>`, remove `<path>.old`. The original file is
//! never truncated; at every point either it or its `.old` copy is intact.
//! If a step fails the `.new` scratch file is left behind.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{io_err, ConfError, ConfResult};

/// Longest sibling path accepted, in bytes.
pub const MAX_PATH_LENGTH: usize = 1023;

/// Builds `<path><suffix>`, rejecting results longer than [`MAX_PATH_LENGTH`].
pub fn sibling_path(path: &Path, suffix: &str) -> ConfResult<PathBuf> {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);

    if name.len() > MAX_PATH_LENGTH {
        return Err(ConfError::NameTooLong {
            path: path.to_path_buf(),
        });
    }

    Ok(PathBuf::from(name))
}

fn ignore_not_found(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Atomically replaces `path` with whatever `fill` writes.
pub fn replace_with<F>(path: &Path, fill: F) -> ConfResult<()>
where
    F: FnOnce(&mut BufWriter<File>) -> io::Result<()>,
{
    let new_path = sibling_path(path, ".new")?;
    let old_path = sibling_path(path, ".old")?;

    let file = File::create(&new_path)
        .map_err(|e| io_err(format!("could not create '{}'", new_path.display()), e))?;
    let mut out = BufWriter::new(file);

    fill(&mut out)
        .and_then(|()| out.flush())
        .map_err(|e| io_err(format!("could not write '{}'", new_path.display()), e))?;

    let file = out
        .into_inner()
        .map_err(|e| io_err(format!("could not write '{}'", new_path.display()), e.into_error()))?;
    file.sync_all()
        .map_err(|e| io_err(format!("could not sync '{}'", new_path.display()), e))?;
    drop(file);

    // Renaming onto an existing file fails on Windows.
    #[cfg(windows)]
    ignore_not_found(fs::remove_file(&old_path))
        .map_err(|e| io_err(format!("could not remove '{}'", old_path.display()), e))?;

    ignore_not_found(fs::rename(path, &old_path)).map_err(|e| {
        io_err(
            format!("could not rename '{}' to '{}'", path.display(), old_path.display()),
            e,
        )
    })?;

    fs::rename(&new_path, path).map_err(|e| {
        io_err(
            format!("could not rename '{}' to '{}'", new_path.display(), path.display()),
            e,
        )
    })?;

    ignore_not_found(fs::remove_file(&old_path))
        .map_err(|e| io_err(format!("could not remove '{}'", old_path.display()), e))?;

    tracing::debug!("replaced {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_suffix_to_full_file_name() {
        let path = sibling_path(Path::new("/etc/app/app.conf"), ".new").unwrap();
        assert_eq!(path, PathBuf::from("/etc/app/app.conf.new"));
    }

    #[test]
    fn rejects_overlong_sibling() {
        let long = "x".repeat(MAX_PATH_LENGTH - 3);
        assert!(sibling_path(Path::new(&long), ".new").is_err());
        assert!(sibling_path(Path::new(&long[1..]), ".new").is_ok());
    }

    #[test]
    fn replaces_existing_file_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.conf");
        fs::write(&path, "old contents\n").unwrap();

        replace_with(&path, |out| out.write_all(b"new contents\n")).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "new contents\n");
        assert!(!dir.path().join("app.conf.new").exists());
        assert!(!dir.path().join("app.conf.old").exists());
    }

    #[test]
    fn creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fresh.conf");

        replace_with(&path, |out| out.write_all(b"a = 1\n")).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "a = 1\n");
    }

    #[test]
    fn failed_fill_keeps_original() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.conf");
        fs::write(&path, "keep\n").unwrap();

        let err = replace_with(&path, |_| Err(io::Error::other("disk full"))).unwrap_err();

        assert!(matches!(err, ConfError::Io { .. }), "got: {err}");
        assert_eq!(fs::read_to_string(&path).unwrap(), "keep\n");
        assert!(dir.path().join("app.conf.new").exists());
    }
}
