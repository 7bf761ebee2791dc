//! The ordered line store behind a conf file.

use std::io::{self, Write};

use crate::error::ConfResult;
use crate::escape;

/// End-of-line marker used when writing.
#[cfg(windows)]
pub const END_OF_LINE: &[u8] = b"\r\n";
#[cfg(not(windows))]
pub const END_OF_LINE: &[u8] = b"\n";

/// One line of a conf file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfLine {
    /// A comment, blank or unparsable line, kept byte-for-byte without its
    /// end-of-line marker.
    Verbatim(Vec<u8>),
    /// A decoded `name = value` pair.
    Option { name: Vec<u8>, value: Vec<u8> },
}

impl ConfLine {
    /// Returns the option name, or `None` for verbatim lines.
    pub fn name(&self) -> Option<&[u8]> {
        match self {
            ConfLine::Option { name, .. } => Some(name),
            ConfLine::Verbatim(_) => None,
        }
    }

    /// Returns the option value, or `None` for verbatim lines.
    pub fn value(&self) -> Option<&[u8]> {
        match self {
            ConfLine::Option { value, .. } => Some(value),
            ConfLine::Verbatim(_) => None,
        }
    }

    fn is_blank(&self) -> bool {
        matches!(self, ConfLine::Verbatim(raw) if raw.is_empty())
    }

    fn matches(&self, wanted: &[u8]) -> bool {
        self.name().is_some_and(|name| name.eq_ignore_ascii_case(wanted))
    }

    /// Writes the on-disk form of this line including the end-of-line marker.
    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        match self {
            ConfLine::Verbatim(raw) => out.write_all(raw)?,
            ConfLine::Option { name, value } => {
                let mut buf = Vec::with_capacity(name.len() + value.len() + 3);
                escape::escape_into(&mut buf, name, true);
                buf.extend_from_slice(b" =");
                if !value.is_empty() {
                    buf.push(b' ');
                    escape::escape_into(&mut buf, value, false);
                }
                out.write_all(&buf)?;
            }
        }
        out.write_all(END_OF_LINE)
    }
}

/// Ordered sequence of [`ConfLine`]s. Duplicate names are allowed; the last
/// one wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineStore {
    lines: Vec<ConfLine>,
}

impl LineStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> &[ConfLine] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub(crate) fn push(&mut self, line: ConfLine) -> ConfResult<()> {
        self.lines.try_reserve(1)?;
        self.lines.push(line);
        Ok(())
    }

    /// Drops the run of empty verbatim lines at the end.
    pub(crate) fn trim_trailing_blanks(&mut self) {
        while self.lines.last().is_some_and(ConfLine::is_blank) {
            self.lines.pop();
        }
    }

    /// Case-insensitive lookup; later lines override earlier ones.
    pub fn get(&self, name: &[u8]) -> Option<&[u8]> {
        self.lines
            .iter()
            .rev()
            .find(|line| line.matches(name))
            .and_then(ConfLine::value)
    }

    /// Replaces the value of the last line named `name`, or appends a new
    /// option line when there is none. An empty `name` does not survive a
    /// write and re-read.
    pub fn set(&mut self, name: &[u8], value: &[u8]) -> ConfResult<()> {
        let mut owned = Vec::new();
        owned.try_reserve_exact(value.len())?;
        owned.extend_from_slice(value);

        if let Some(ConfLine::Option { value, .. }) =
            self.lines.iter_mut().rev().find(|line| line.matches(name))
        {
            *value = owned;
            return Ok(());
        }

        let mut new_name = Vec::new();
        new_name.try_reserve_exact(name.len())?;
        new_name.extend_from_slice(name);

        self.push(ConfLine::Option {
            name: new_name,
            value: owned,
        })
    }

    /// Serializes every line in order.
    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        self.lines.iter().try_for_each(|line| line.write_to(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn option(name: &str, value: &str) -> ConfLine {
        ConfLine::Option {
            name: name.as_bytes().to_vec(),
            value: value.as_bytes().to_vec(),
        }
    }

    fn store(lines: Vec<ConfLine>) -> LineStore {
        let mut store = LineStore::new();
        for line in lines {
            store.push(line).unwrap();
        }
        store
    }

    fn render(store: &LineStore) -> String {
        let mut out = Vec::new();
        store.write_to(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn last_definition_wins() {
        let mut store = store(vec![option("a", "1"), option("a", "2")]);
        assert_eq!(store.get(b"a"), Some(&b"2"[..]));

        store.set(b"a", b"3").unwrap();
        assert_eq!(store.lines()[0], option("a", "1"));
        assert_eq!(store.lines()[1], option("a", "3"));
        assert_eq!(store.get(b"A"), Some(&b"3"[..]));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn set_unknown_name_appends() {
        let mut store = store(vec![ConfLine::Verbatim(b"# header".to_vec()), option("a", "1")]);
        store.set(b"new", b"v").unwrap();

        assert_eq!(store.len(), 3);
        assert_eq!(store.lines()[2], option("new", "v"));
        assert_eq!(store.get(b"new"), Some(&b"v"[..]));
    }

    #[test]
    fn verbatim_lines_never_match() {
        let store = store(vec![ConfLine::Verbatim(b"a = 1".to_vec())]);
        assert_eq!(store.get(b"a"), None);
    }

    #[test]
    fn trims_only_trailing_blank_verbatim_lines() {
        let mut store = store(vec![
            ConfLine::Verbatim(Vec::new()),
            option("a", ""),
            ConfLine::Verbatim(b"   ".to_vec()),
            ConfLine::Verbatim(Vec::new()),
            ConfLine::Verbatim(Vec::new()),
        ]);
        store.trim_trailing_blanks();

        assert_eq!(store.len(), 3);
        assert_eq!(store.lines()[2], ConfLine::Verbatim(b"   ".to_vec()));
    }

    #[test]
    fn writes_escaped_option_lines() {
        let store = store(vec![
            ConfLine::Verbatim(b"# keep me".to_vec()),
            option("name", "value"),
            option("empty", ""),
            option("a=b", " x"),
        ]);

        let eol = std::str::from_utf8(END_OF_LINE).unwrap();
        let expected = format!(
            "# keep me{eol}name = value{eol}empty ={eol}a\\x3Db = \\x20x{eol}"
        );
        assert_eq!(render(&store), expected);
    }

    #[test]
    fn empty_name_is_written_without_a_name() {
        let mut store = LineStore::new();
        store.set(b"", b"v").unwrap();

        assert_eq!(store.get(b""), Some(&b"v"[..]));
        let eol = std::str::from_utf8(END_OF_LINE).unwrap();
        assert_eq!(render(&store), format!(" = v{eol}"));
    }
}
