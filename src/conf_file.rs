//! Reading and writing `.conf` files.
//!
//! The format is one `name = value` option per line. Blank lines and lines
//! whose first non-whitespace character is `#` are comments. Comments and
//! lines that fail to parse as options are kept verbatim, so a file survives
//! a read/write cycle unchanged apart from the canonical spelling of option
//! lines. Names and values use the escape grammar from [`crate::escape`].

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use crate::error::{io_err, ConfError, ConfResult};
use crate::escape::{self, EscapeError};
use crate::line::{ConfLine, LineStore};
use crate::replace;

/// Initial capacity of the line buffer.
pub const INITIAL_LINE_CAPACITY: usize = 256;

/// The line buffer stops doubling at this capacity.
pub const LINE_BUFFER_LIMIT: usize = 32 * 1024;

/// Longest line kept; longer lines are skipped with a warning.
pub const MAX_LINE_LENGTH: usize = LINE_BUFFER_LIMIT - 1;

/// Number of bytes of an overlong line quoted in the warning.
pub const TOO_LONG_PREVIEW: usize = 32;

/// Non-fatal problems found while reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    /// The line has `=` but nothing before it.
    NameMissing,
    /// The line is neither a comment nor contains `=`.
    EqualSignMissing,
    /// The line exceeds [`MAX_LINE_LENGTH`] and was skipped.
    LineTooLong,
}

impl fmt::Display for WarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WarningKind::NameMissing => "option name is missing",
            WarningKind::EqualSignMissing => "'=' is missing",
            WarningKind::LineTooLong => "line is too long",
        })
    }
}

/// A warning passed to the read callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadWarning<'a> {
    pub kind: WarningKind,
    /// 1-based line number.
    pub line: usize,
    /// The original line, or its first [`TOO_LONG_PREVIEW`] bytes.
    pub text: &'a [u8],
}

impl fmt::Display for ReadWarning<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "line {}: {}: {}",
            self.line,
            self.kind,
            String::from_utf8_lossy(self.text)
        )
    }
}

fn log_warning(warning: &ReadWarning<'_>) {
    tracing::warn!("{warning}");
}

fn is_blank(byte: u8) -> bool {
    matches!(byte, b' ' | b'\t' | b'\r')
}

fn trim_start(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|&b| !is_blank(b)).unwrap_or(bytes.len());
    &bytes[start..]
}

fn trim_end(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().rposition(|&b| !is_blank(b)).map_or(0, |i| i + 1);
    &bytes[..end]
}

fn at_line(err: EscapeError, line: usize) -> ConfError {
    match err {
        EscapeError::InvalidCharacter { byte, .. } => ConfError::InvalidCharacter { line, byte },
        EscapeError::InvalidEscape { .. } => ConfError::InvalidEscape { line },
        EscapeError::OutOfMemory => ConfError::OutOfMemory,
    }
}

fn decode(bytes: &[u8], line: usize) -> ConfResult<Vec<u8>> {
    escape::unescape(bytes).map_err(|err| at_line(err, line))
}

/// Classifies one line (without its end-of-line marker).
fn parse_line<F>(buffer: &[u8], number: usize, on_warning: &mut F) -> ConfResult<ConfLine>
where
    F: FnMut(&ReadWarning<'_>),
{
    let verbatim = || -> ConfResult<ConfLine> {
        let mut raw = Vec::new();
        raw.try_reserve_exact(buffer.len())?;
        raw.extend_from_slice(buffer);
        Ok(ConfLine::Verbatim(raw))
    };

    let content = trim_start(buffer);
    if content.is_empty() || content[0] == b'#' {
        return verbatim();
    }

    let Some(split) = content.iter().position(|&b| b == b'=') else {
        on_warning(&ReadWarning {
            kind: WarningKind::EqualSignMissing,
            line: number,
            text: buffer,
        });
        return verbatim();
    };

    let name = trim_end(&content[..split]);
    if name.is_empty() {
        on_warning(&ReadWarning {
            kind: WarningKind::NameMissing,
            line: number,
            text: buffer,
        });
        return verbatim();
    }

    let value = trim_end(trim_start(&content[split + 1..]));

    Ok(ConfLine::Option {
        name: decode(name, number)?,
        value: decode(value, number)?,
    })
}

/// Accumulates one line at a time, growing from [`INITIAL_LINE_CAPACITY`]
/// by doubling up to [`LINE_BUFFER_LIMIT`].
struct LineBuffer {
    bytes: Vec<u8>,
    allocated: usize,
    skipping: bool,
}

impl LineBuffer {
    fn new() -> ConfResult<Self> {
        let mut bytes = Vec::new();
        bytes.try_reserve_exact(INITIAL_LINE_CAPACITY)?;
        Ok(Self {
            bytes,
            allocated: INITIAL_LINE_CAPACITY,
            skipping: false,
        })
    }

    /// Appends `byte`; returns `false` once the line has become too long.
    fn push(&mut self, byte: u8) -> ConfResult<bool> {
        if self.bytes.len() + 1 > MAX_LINE_LENGTH {
            return Ok(false);
        }
        if self.bytes.len() == self.allocated {
            let grown = (self.allocated * 2).min(LINE_BUFFER_LIMIT);
            self.bytes.try_reserve_exact(grown - self.bytes.len())?;
            self.allocated = grown;
        }
        self.bytes.push(byte);
        Ok(true)
    }

    fn reset(&mut self) {
        self.bytes.clear();
        self.skipping = false;
    }
}

fn parse_stream<R, F>(reader: R, mut on_warning: F) -> ConfResult<LineStore>
where
    R: Read,
    F: FnMut(&ReadWarning<'_>),
{
    let mut store = LineStore::new();
    let mut buffer = LineBuffer::new()?;
    let mut number = 1;
    let mut bytes = reader.bytes();

    loop {
        // A NUL byte ends the file like end-of-stream does.
        let next = match bytes.next().transpose() {
            Ok(Some(0)) | Ok(None) => None,
            Ok(Some(byte)) => Some(byte),
            Err(err) => return Err(io_err("could not read conf file", err)),
        };

        match next {
            Some(b'\n') | None => {
                if !buffer.skipping {
                    if next.is_some() && buffer.bytes.last() == Some(&b'\r') {
                        buffer.bytes.pop();
                    }
                    let line = parse_line(&buffer.bytes, number, &mut on_warning)?;
                    store.push(line)?;
                }

                if next.is_none() {
                    break;
                }

                buffer.reset();
                number += 1;
            }
            Some(byte) if !buffer.skipping => {
                if !buffer.push(byte)? {
                    buffer.skipping = true;
                    let preview = &buffer.bytes[..TOO_LONG_PREVIEW.min(buffer.bytes.len())];
                    on_warning(&ReadWarning {
                        kind: WarningKind::LineTooLong,
                        line: number,
                        text: preview,
                    });
                }
            }
            Some(_) => {}
        }
    }

    store.trim_trailing_blanks();
    Ok(store)
}

/// An in-memory conf file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfFile {
    path: Option<PathBuf>,
    lines: LineStore,
}

impl ConfFile {
    /// Creates an empty conf file with no origin path.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `path`, logging parser warnings through `tracing`.
    pub fn read<P: AsRef<Path>>(path: P) -> ConfResult<Self> {
        Self::read_with(path, log_warning)
    }

    /// Reads `path`, passing parser warnings to `on_warning`.
    ///
    /// Any I/O or escape error aborts the whole read.
    pub fn read_with<P, F>(path: P, on_warning: F) -> ConfResult<Self>
    where
        P: AsRef<Path>,
        F: FnMut(&ReadWarning<'_>),
    {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| io_err(format!("could not open '{}'", path.display()), e))?;
        let lines = parse_stream(BufReader::new(file), on_warning).map_err(|err| match err {
            ConfError::Io { source, .. } => {
                io_err(format!("could not read '{}'", path.display()), source)
            }
            other => other,
        })?;

        Ok(Self {
            path: Some(path.to_path_buf()),
            lines,
        })
    }

    /// Parses conf text from any reader. The result has no origin path.
    pub fn from_reader<R, F>(reader: R, on_warning: F) -> ConfResult<Self>
    where
        R: Read,
        F: FnMut(&ReadWarning<'_>),
    {
        Ok(Self {
            path: None,
            lines: parse_stream(reader, on_warning)?,
        })
    }

    /// The path this file was read from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn lines(&self) -> &[ConfLine] {
        self.lines.lines()
    }

    /// Looks up `name` case-insensitively; the last definition wins.
    pub fn get(&self, name: impl AsRef<[u8]>) -> Option<&[u8]> {
        self.lines.get(name.as_ref())
    }

    /// Like [`ConfFile::get`], but only returns values that are valid UTF-8.
    pub fn get_str(&self, name: impl AsRef<[u8]>) -> Option<&str> {
        self.get(name).and_then(|value| std::str::from_utf8(value).ok())
    }

    /// Updates the last definition of `name` in place, or appends a new one.
    ///
    /// An empty `name` is stored like any other, but the written line
    /// (` = value`) reads back as a verbatim line with a
    /// [`WarningKind::NameMissing`] warning.
    pub fn set(&mut self, name: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> ConfResult<()> {
        self.lines.set(name.as_ref(), value.as_ref())
    }

    /// Serializes all lines to `out`.
    pub fn write_to<W: io::Write>(&self, out: &mut W) -> io::Result<()> {
        self.lines.write_to(out)
    }

    /// Atomically replaces `path` with the serialized lines.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> ConfResult<()> {
        replace::replace_with(path.as_ref(), |out| self.write_to(out))
    }

    /// Writes back to the path this file was read from.
    pub fn save(&self) -> ConfResult<()> {
        let path = self.path.as_deref().ok_or_else(|| {
            io_err(
                "could not save conf file",
                io::Error::new(io::ErrorKind::NotFound, "no origin path"),
            )
        })?;
        self.write(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_errors_carry_the_line_number() {
        assert_eq!(decode(br"va\x20lue", 4).unwrap(), b"va lue");
        assert!(matches!(decode(br"bad\q", 2), Err(ConfError::InvalidEscape { line: 2 })));
        assert!(matches!(
            decode(b"x\x7F", 5),
            Err(ConfError::InvalidCharacter { line: 5, byte: 0x7F })
        ));
    }

    #[test]
    fn allocation_failure_while_decoding_is_out_of_memory() {
        assert!(matches!(at_line(EscapeError::OutOfMemory, 9), ConfError::OutOfMemory));
    }
}
