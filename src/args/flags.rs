use std::{
    ffi::OsString,
    io::{self, Read},
    path::{Path, PathBuf},
    sync::LazyLock,
};

use {anyhow::Context, bstr::ByteSlice, regex::Regex};

use crate::args::{Configurable, Usage};

/// A simple abstraction over "one file path or stdin."
///
/// As a `Configurable`, this consumes at most one positional argument.
#[derive(Clone, Debug)]
pub struct FileOrStdin {
    path: Option<PathBuf>,
}

impl FileOrStdin {
    pub const USAGE: Usage = Usage::arg(
        "<path>",
        "A file containing a recurrence, or `-` for stdin.",
        r#"
A file containing a recurrence, or `-` for stdin.

A recurrence is a sequence of lines, each one of DTSTART, DTEND, RRULE,
EXRULE, RDATE or EXDATE followed by a colon and a value. Blank lines are
ignored.

When no path is given, the recurrence is read from stdin.
"#,
    );

    /// Create a `FileOrStdin` that reads from `stdin`.
    ///
    /// This doesn't actually read or touch `stdin` until
    /// `FileOrStdin::read_to_string` is called. This means that this is a
    /// useful default value for CLI parsing.
    ///
    /// This corresponds to `FileOrStdin::default()`.
    pub fn stdin() -> FileOrStdin {
        FileOrStdin { path: None }
    }

    /// Sets the path to the one provided, but only if no path has already been
    /// set.
    ///
    /// If a path has already been set, then an error is returned.
    pub fn set(&mut self, path: impl Into<PathBuf>) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.path.is_none(),
            "command only accepts a single path",
        );
        *self = FileOrStdin::from(path.into());
        Ok(())
    }

    /// Return a `std::fmt::Display` impl for the underlying file or stdin.
    ///
    /// When a file, this is its file path. When stdin, it's the literal
    /// string `<stdin>`.
    pub fn display(&self) -> impl std::fmt::Display + '_ {
        self.path.as_deref().unwrap_or_else(|| Path::new("<stdin>")).display()
    }

    /// Reads the entire contents of the file or stdin.
    ///
    /// An error is returned if the contents aren't valid UTF-8.
    pub fn read_to_string(&self) -> anyhow::Result<String> {
        let mut bytes = vec![];
        if let Some(ref path) = self.path {
            std::fs::File::open(path)
                .and_then(|mut file| file.read_to_end(&mut bytes))
                .with_context(|| format!("{}", path.display()))?;
        } else {
            io::stdin().lock().read_to_end(&mut bytes).context("<stdin>")?;
        }
        match bytes.to_str() {
            Ok(_) => {}
            Err(err) => anyhow::bail!(
                "{}: invalid UTF-8 at byte offset {}",
                self.display(),
                err.valid_up_to(),
            ),
        }
        log::trace!("read {} bytes from {}", bytes.len(), self.display());
        String::from_utf8(bytes).context("invalid UTF-8")
    }
}

impl Default for FileOrStdin {
    fn default() -> FileOrStdin {
        FileOrStdin::stdin()
    }
}

impl From<OsString> for FileOrStdin {
    fn from(os_str: OsString) -> FileOrStdin {
        FileOrStdin::from(PathBuf::from(os_str))
    }
}

impl From<PathBuf> for FileOrStdin {
    fn from(path: PathBuf) -> FileOrStdin {
        if path == Path::new("-") {
            FileOrStdin { path: None }
        } else {
            FileOrStdin { path: Some(path) }
        }
    }
}

impl Configurable for FileOrStdin {
    fn configure(
        &mut self,
        _: &mut lexopt::Parser,
        arg: &mut lexopt::Arg,
    ) -> anyhow::Result<bool> {
        match *arg {
            lexopt::Arg::Value(ref mut v) => {
                self.set(std::mem::take(v))?;
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn usage(&self) -> &[Usage] {
        &[FileOrStdin::USAGE]
    }
}

/// A sequence of comma separated values.
///
/// Surrounding whitespace on each item is ignored. Empty sequences are
/// rejected.
#[derive(Clone, Debug)]
pub struct CommaSequence<T>(Vec<T>);

impl<T> CommaSequence<T> {
    /// Returns an iterator over every item in this sequence.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.0.iter()
    }
}

impl<'a, T> IntoIterator for &'a CommaSequence<T> {
    type IntoIter = std::slice::Iter<'a, T>;
    type Item = &'a T;

    fn into_iter(self) -> std::slice::Iter<'a, T> {
        self.0.iter()
    }
}

impl<T, E> std::str::FromStr for CommaSequence<T>
where
    T: std::str::FromStr<Err = E>,
    E: std::fmt::Display,
{
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<CommaSequence<T>> {
        let mut seq = vec![];
        for item in s.split(",").map(str::trim) {
            if item.is_empty() {
                continue;
            }
            seq.push(item.parse::<T>().map_err(|err| {
                anyhow::Error::msg(format!(
                    "failed to parse `{item}` \
                     within sequence `{s}`: {err}",
                ))
            })?);
        }
        anyhow::ensure!(!seq.is_empty(), "empty sequences are not allowed");
        Ok(CommaSequence(seq))
    }
}

/// A fixed UTC offset given on the command line, e.g., `-05:00`.
///
/// Besides `±HH:MM`, this accepts `±HHMM`, `±HH` and `Z` for UTC.
#[derive(Clone, Copy, Debug)]
pub struct Offset(jiff::tz::Offset);

impl Offset {
    pub fn get(&self) -> jiff::tz::Offset {
        self.0
    }
}

impl std::str::FromStr for Offset {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Offset> {
        static RE: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"^(?<sign>[-+])(?<hh>[0-9]{2})(?::?(?<mm>[0-9]{2}))?$")
                .unwrap()
        });

        if s.eq_ignore_ascii_case("z") {
            return Ok(Offset(jiff::tz::Offset::UTC));
        }
        let Some(caps) = RE.captures(s) else {
            anyhow::bail!(
                "unrecognized offset `{s}` (expected `±HH:MM`, \
                 for example, `-05:00`)",
            )
        };
        let hours: i32 = caps["hh"].parse()?;
        let minutes: i32 = caps.name("mm").map_or(Ok(0), |m| m.as_str().parse())?;
        anyhow::ensure!(
            minutes < 60,
            "invalid offset `{s}` (minutes must be less than 60)",
        );
        let mut seconds = hours * 60 * 60 + minutes * 60;
        if &caps["sign"] == "-" {
            seconds = -seconds;
        }
        let offset = jiff::tz::Offset::from_seconds(seconds)
            .with_context(|| format!("invalid offset `{s}`"))?;
        Ok(Offset(offset))
    }
}
