//! Escape grammar for option names and values.
//!
//! On disk every byte of a name or value is printable ASCII. Everything else,
//! plus the few printable characters that would change how a line parses, is
//! written as a backslash escape:
//!
//! - `\a \b \f \n \r \t \v \\` for the usual control characters,
//! - `\' \"` are accepted on read but never produced,
//! - `\xHH` for any other byte in `0x01..=0xFF`.
//!
//! `\x00` is rejected: a stored string never contains NUL.

use thiserror::Error;

/// Why [`unescape`] failed. Offsets are byte positions in the escaped input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EscapeError {
    #[error("invalid character 0x{byte:02X} at offset {offset}")]
    InvalidCharacter { offset: usize, byte: u8 },
    #[error("invalid escape sequence at offset {offset}")]
    InvalidEscape { offset: usize },
    #[error("out of memory")]
    OutOfMemory,
}

fn is_printable(byte: u8) -> bool {
    (b' '..=b'~').contains(&byte)
}

fn hex_value(digit: u8) -> Option<u8> {
    match digit {
        b'0'..=b'9' => Some(digit - b'0'),
        b'a'..=b'f' => Some(digit - b'a' + 10),
        b'A'..=b'F' => Some(digit - b'A' + 10),
        _ => None,
    }
}

/// Decodes an escaped name or value.
///
/// The output is never longer than the input.
pub fn unescape(input: &[u8]) -> Result<Vec<u8>, EscapeError> {
    let mut out = Vec::new();
    out.try_reserve_exact(input.len())
        .map_err(|_| EscapeError::OutOfMemory)?;
    let mut i = 0;

    while i < input.len() {
        let byte = input[i];

        if !is_printable(byte) {
            return Err(EscapeError::InvalidCharacter { offset: i, byte });
        }

        if byte != b'\\' {
            out.push(byte);
            i += 1;
            continue;
        }

        let start = i;
        let Some(&kind) = input.get(i + 1) else {
            return Err(EscapeError::InvalidEscape { offset: start });
        };
        i += 2;

        let decoded = match kind {
            b'a' => 0x07,
            b'b' => 0x08,
            b'f' => 0x0C,
            b'n' => b'\n',
            b'r' => b'\r',
            b't' => b'\t',
            b'v' => 0x0B,
            b'\\' => b'\\',
            b'\'' => b'\'',
            b'"' => b'"',
            b'x' => {
                let (Some(hi), Some(lo)) = (
                    input.get(i).copied().and_then(hex_value),
                    input.get(i + 1).copied().and_then(hex_value),
                ) else {
                    return Err(EscapeError::InvalidEscape { offset: start });
                };
                i += 2;

                let value = (hi << 4) | lo;
                if value == 0 {
                    return Err(EscapeError::InvalidEscape { offset: start });
                }
                value
            }
            _ => return Err(EscapeError::InvalidEscape { offset: start }),
        };

        out.push(decoded);
    }

    Ok(out)
}

fn mnemonic(byte: u8) -> Option<&'static [u8]> {
    Some(match byte {
        0x07 => b"\\a",
        0x08 => b"\\b",
        0x0C => b"\\f",
        b'\n' => b"\\n",
        b'\r' => b"\\r",
        b'\t' => b"\\t",
        0x0B => b"\\v",
        b'\\' => b"\\\\",
        _ => return None,
    })
}

/// Appends the escaped form of `input` to `out`.
///
/// With `name` set, `=` is escaped too so the name cannot be split at it.
/// A leading `#` and leading or trailing spaces are always escaped, since the
/// parser would otherwise read a comment or strip the spaces.
pub fn escape_into(out: &mut Vec<u8>, input: &[u8], name: bool) {
    let last = input.len().saturating_sub(1);
    let mut run_start = None;

    for (i, &byte) in input.iter().enumerate() {
        let comment = byte == b'#' && i == 0;
        let separator = byte == b'=' && name;
        let edge_space = byte == b' ' && (i == 0 || i == last);

        if is_printable(byte) && byte != b'\\' && !comment && !separator && !edge_space {
            run_start.get_or_insert(i);
            continue;
        }

        if let Some(start) = run_start.take() {
            out.extend_from_slice(&input[start..i]);
        }

        match mnemonic(byte) {
            Some(seq) => out.extend_from_slice(seq),
            None => out.extend_from_slice(format!("\\x{byte:02X}").as_bytes()),
        }
    }

    if let Some(start) = run_start {
        out.extend_from_slice(&input[start..]);
    }
}

/// Returns the escaped form of `input`. See [`escape_into`].
pub fn escape(input: &[u8], name: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    escape_into(&mut out, input, name);
    out
}
