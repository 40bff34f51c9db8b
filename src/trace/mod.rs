//! Typed system-call events and the parsers that produce them.
//!
//! Each platform tracer writes its own textual log: strace's
//! `call(args) = ret` lines on Linux, Process Monitor CSV on Windows. Both are
//! turned into the same [`TraceEvent`] shape behind the [`TraceParser`] trait,
//! so the extractor never needs to know which one produced an event.

pub mod procmon;
pub mod strace;

use crate::utils::decode_line;
use anyhow::{Context, Result};
use std::borrow::Cow;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

pub use procmon::ProcmonParser;
pub use strace::{SplitCalls, StraceParser};

/// Classification of an observed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    /// A file was opened
    Open,
    /// A program was executed
    Exec,
    /// A symbolic link was read
    ReadLink,
    /// File metadata was queried
    Stat,
    /// Anything else; ignored downstream
    Other,
}

/// What the call returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Non-negative return code
    Success(i64),
    /// Negative return code
    Failure,
    /// The tracer printed `?`
    Unknown,
}

impl Outcome {
    /// Maps a raw return code to an outcome.
    #[must_use]
    pub const fn from_code(code: i64) -> Self {
        if code < 0 { Self::Failure } else { Self::Success(code) }
    }

    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// One observed system call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEvent {
    /// Call name as printed by the tracer (`openat`, `CreateFile`, ...)
    pub call: String,
    pub kind: CallKind,
    /// Raw argument text, in order; paths keep their surrounding quotes
    pub arguments: Vec<String>,
    pub outcome: Outcome,
}

impl TraceEvent {
    /// The quoted path argument, if the call has one.
    ///
    /// The `*at` variants take a directory descriptor first, so their path
    /// sits in the second slot.
    #[must_use]
    pub fn path_argument(&self) -> Option<&str> {
        let index = usize::from(takes_dirfd(&self.call));
        self.arguments.get(index).map(String::as_str)
    }

    /// For link reads, the quoted target the call returned.
    #[must_use]
    pub fn link_target_argument(&self) -> Option<&str> {
        if self.kind != CallKind::ReadLink {
            return None;
        }
        let index = 1 + usize::from(takes_dirfd(&self.call));
        self.arguments.get(index).map(String::as_str)
    }
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.call, self.arguments.join(", "))?;
        match self.outcome {
            Outcome::Success(code) => write!(f, " = {code}"),
            Outcome::Failure => write!(f, " = -1"),
            Outcome::Unknown => write!(f, " = ?"),
        }
    }
}

fn takes_dirfd(call: &str) -> bool {
    matches!(
        call,
        "openat" | "openat2" | "readlinkat" | "execveat" | "newfstatat" | "fstatat64" | "statx"
    )
}

/// Why a line that looked like a call record could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The return value was neither an integer nor `?`
    BadReturn(String),
    /// A field the format requires was absent
    MissingField(&'static str),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadReturn(raw) => write!(f, "unparseable return value '{raw}'"),
            Self::MissingField(field) => write!(f, "missing field: {field}"),
        }
    }
}

impl std::error::Error for ParseError {}

/// Turns one line of raw tracer output into an event.
pub trait TraceParser {
    /// `Ok(None)` for lines that are not call records (headers, noise);
    /// `Err` for records that could not be understood. Callers skip both.
    fn parse_line(&self, line: &str) -> Result<Option<TraceEvent>, ParseError>;

    /// Fresh state for rejoining records that the tracer split over two
    /// lines. Parsers whose records always fit on one line keep the default.
    fn split_calls(&self) -> Option<SplitCalls> {
        None
    }
}

/// Tracing strategy available on the running OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// strace, which follows subprocesses natively
    Linux,
    /// Process Monitor, system wide; needs pid post-filtering
    Windows,
}

impl Platform {
    /// Detected once; everything platform specific keys off this.
    #[must_use]
    pub const fn current() -> Self {
        if cfg!(windows) { Self::Windows } else { Self::Linux }
    }

    #[must_use]
    pub fn parser(self) -> Box<dyn TraceParser> {
        match self {
            Self::Linux => Box::new(StraceParser),
            Self::Windows => Box::new(ProcmonParser),
        }
    }
}

/// Parses every line of `lines`, dropping anything the parser rejects.
pub fn parse_lines<'a, I>(parser: &dyn TraceParser, lines: I) -> Vec<TraceEvent>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut split = parser.split_calls();
    let mut events = Vec::new();
    for line in lines {
        parse_into(parser, split.as_mut(), line, &mut events);
    }
    events
}

fn parse_into(
    parser: &dyn TraceParser,
    split: Option<&mut SplitCalls>,
    line: &str,
    events: &mut Vec<TraceEvent>,
) {
    let line = match split {
        Some(split) => match split.join(line) {
            Some(line) => line,
            None => return,
        },
        None => Cow::Borrowed(line),
    };
    match parser.parse_line(&line) {
        Ok(Some(event)) => events.push(event),
        Ok(None) => {}
        Err(e) => tracing::debug!(line = %line, error = %e, "skipping unparseable trace line"),
    }
}

/// Reads a trace log from disk and parses it.
///
/// # Errors
///
/// Returns an error only if the file cannot be opened or read; malformed
/// lines are skipped.
pub fn parse_file(parser: &dyn TraceParser, path: &Path) -> Result<Vec<TraceEvent>> {
    let span = tracing::span!(tracing::Level::DEBUG, "parse_file", path = %path.display());
    let _guard = span.enter();

    let file = File::open(path)
        .with_context(|| format!("Failed to open trace log {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut split = parser.split_calls();
    let mut events = Vec::new();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .with_context(|| format!("Failed to read trace log {}", path.display()))?;
        if read == 0 {
            break;
        }
        let line = decode_line(&buf);
        let line = line.trim_end_matches(['\n', '\r']);
        parse_into(parser, split.as_mut(), line, &mut events);
    }

    tracing::debug!(count = events.len(), "parsed trace events");
    Ok(events)
}

/// Strips the surrounding quotes from a path argument and decodes the
/// C-style escapes tracers use.
///
/// Returns `None` for arguments that are not a complete quoted string: a file
/// descriptor, a flag set, or a string the tracer truncated (`"..."...`).
#[must_use]
pub fn unquote(argument: &str) -> Option<String> {
    let inner = argument.strip_prefix('"')?.strip_suffix('"')?;

    let mut out: Vec<u8> = Vec::with_capacity(inner.len());
    let bytes = inner.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'"' {
            // an unescaped quote means this was two strings, e.g. truncation
            return None;
        }
        if b != b'\\' {
            out.push(b);
            i += 1;
            continue;
        }
        let escaped = *bytes.get(i + 1)?;
        i += 2;
        match escaped {
            b'n' => out.push(b'\n'),
            b't' => out.push(b'\t'),
            b'r' => out.push(b'\r'),
            b'v' => out.push(0x0b),
            b'f' => out.push(0x0c),
            b'0'..=b'7' => {
                let mut value = u32::from(escaped - b'0');
                let mut digits = 1;
                while digits < 3 {
                    match bytes.get(i) {
                        Some(d @ b'0'..=b'7') => {
                            value = value * 8 + u32::from(d - b'0');
                            i += 1;
                            digits += 1;
                        }
                        _ => break,
                    }
                }
                out.push(u8::try_from(value).ok()?);
            }
            b'x' => {
                let hex = inner.get(i..i + 2)?;
                out.push(u8::from_str_radix(hex, 16).ok()?);
                i += 2;
            }
            other => out.push(other),
        }
    }

    String::from_utf8(out).ok()
}
