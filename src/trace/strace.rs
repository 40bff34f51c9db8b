//! Parser for strace's text output.
//!
//! A record looks like `openat(AT_FDCWD, "/etc/ld.so.cache", O_RDONLY) = 3`,
//! optionally prefixed with the pid when subprocesses are followed
//! (`1234  open(...)` in a log file, `[pid 1234] open(...)` on a terminal) and
//! optionally followed by an errno annotation (`= -1 ENOENT (No such file)`).
//!
//! When another process is scheduled mid-call, strace prints the call as
//! `openat(..., O_RDONLY <unfinished ...>` and later finishes it with
//! `<... openat resumed>) = 3`. [`SplitCalls`] glues the halves back
//! together per pid.

use super::{CallKind, Outcome, ParseError, TraceEvent, TraceParser};
use std::borrow::Cow;
use std::collections::HashMap;

const UNFINISHED: &str = "<unfinished ...>";
const RESUMED: &str = " resumed>";

#[derive(Debug, Clone, Copy, Default)]
pub struct StraceParser;

impl TraceParser for StraceParser {
    fn parse_line(&self, line: &str) -> Result<Option<TraceEvent>, ParseError> {
        let line = strip_pid_prefix(line.trim());

        let Some(open_paren) = line.find('(') else {
            return Ok(None);
        };
        let call = line[..open_paren].trim();
        if !is_identifier(call) {
            return Ok(None);
        }

        // Struct literals in the arguments may contain '=' too, so the return
        // value is whatever follows the last one.
        let Some(equals) = line.rfind('=') else {
            return Ok(None);
        };
        if equals < open_paren {
            return Ok(None);
        }
        let lhs = line[..equals].trim_end();
        if !lhs.ends_with(')') {
            return Ok(None);
        }
        let rhs = line[equals + 1..].trim();

        let arguments = parse_args(&lhs[open_paren + 1..]);
        let outcome = parse_return(rhs)?;

        Ok(Some(TraceEvent {
            call: call.to_string(),
            kind: classify(call),
            arguments,
            outcome,
        }))
    }

    fn split_calls(&self) -> Option<SplitCalls> {
        Some(SplitCalls::default())
    }
}

/// Calls left `<unfinished ...>`, keyed by pid (0 when the log has none).
#[derive(Debug, Default)]
pub struct SplitCalls {
    pending: HashMap<u32, String>,
}

impl SplitCalls {
    /// Returns the line to parse: `line` itself, or the rejoined call once
    /// its `resumed` half arrives. `None` while a call is still waiting, and
    /// for a resumption whose start was never seen.
    pub fn join<'a>(&mut self, line: &'a str) -> Option<Cow<'a, str>> {
        let (pid, rest) = split_pid_prefix(line.trim());
        let pid = pid.unwrap_or(0);

        if let Some(head) = rest.strip_suffix(UNFINISHED) {
            self.pending.insert(pid, head.trim_end().to_string());
            return None;
        }

        if let Some(resumed) = rest.strip_prefix("<... ")
            && let Some(marker) = resumed.find(RESUMED)
        {
            let tail = &resumed[marker + RESUMED.len()..];
            let Some(head) = self.pending.remove(&pid) else {
                tracing::debug!(pid, %line, "resumed call without a start");
                return None;
            };
            return Some(Cow::Owned(format!("{head}{tail}")));
        }

        Some(Cow::Borrowed(line))
    }

    /// Number of calls still waiting for their second half.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Removes a `[pid N]` or bare `N` prefix.
fn strip_pid_prefix(line: &str) -> &str {
    split_pid_prefix(line).1
}

fn split_pid_prefix(line: &str) -> (Option<u32>, &str) {
    if let Some(rest) = line.strip_prefix("[pid")
        && let Some(close) = rest.find(']')
    {
        return (rest[..close].trim().parse().ok(), rest[close + 1..].trim_start());
    }
    if line.starts_with(|c: char| c.is_ascii_digit()) {
        let digits_end = line
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(line.len());
        let rest = &line[digits_end..];
        if rest.starts_with(char::is_whitespace) {
            return (line[..digits_end].parse().ok(), rest.trim_start());
        }
    }
    (None, line)
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Splits the raw argument text (everything after the opening paren, closing
/// paren included) into top-level arguments.
///
/// Commas only separate arguments outside of `{...}` struct literals,
/// `[...]` arrays and quoted strings; the first top-level `)` ends the list.
/// Unbalanced nesting never fails, the scan just runs to the end of the text.
#[must_use]
pub fn parse_args(raw: &str) -> Vec<String> {
    if raw.trim_start().starts_with(')') {
        return Vec::new();
    }

    let mut args = Vec::new();
    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in raw.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => depth -= 1,
            ',' if depth == 0 => {
                args.push(raw[start..i].trim().to_string());
                start = i + 1;
            }
            ')' if depth == 0 => {
                args.push(raw[start..i].trim().to_string());
                return args;
            }
            _ => {}
        }
    }

    let rest = raw[start..].trim();
    if !rest.is_empty() {
        args.push(rest.to_string());
    }
    args
}

/// `?` is an unknown return; otherwise the leading integer, ignoring any
/// errno name or comment after it.
fn parse_return(rhs: &str) -> Result<Outcome, ParseError> {
    let token = rhs
        .split_whitespace()
        .next()
        .ok_or(ParseError::MissingField("return value"))?;
    if token == "?" {
        return Ok(Outcome::Unknown);
    }
    token
        .parse::<i64>()
        .map(Outcome::from_code)
        .map_err(|_| ParseError::BadReturn(token.to_string()))
}

fn classify(call: &str) -> CallKind {
    match call {
        "open" | "openat" | "openat2" => CallKind::Open,
        "readlink" | "readlinkat" => CallKind::ReadLink,
        "stat" | "lstat" | "fstat" | "stat64" | "lstat64" | "fstat64" | "newfstatat"
        | "fstatat64" | "statx" => CallKind::Stat,
        c if c.starts_with("exec") => CallKind::Exec,
        _ => CallKind::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn parse(line: &str) -> Option<TraceEvent> {
        StraceParser.parse_line(line).ok().flatten()
    }

    #[test]
    fn test_simple_open() {
        let event = parse("open(\"/a/b\", 0) = 3").unwrap();
        assert_eq!(event.kind, CallKind::Open);
        assert_eq!(event.arguments, vec!["\"/a/b\"", "0"]);
        assert_eq!(event.outcome, Outcome::Success(3));
    }

    #[test]
    fn test_failure_and_unknown() {
        let failed = parse("open(\"/missing\", O_RDONLY) = -1 ENOENT (No such file or directory)")
            .unwrap();
        assert_eq!(failed.outcome, Outcome::Failure);

        let unknown = parse("execve(\"/bin/true\", [\"true\"], 0x7ffd /* 20 vars */) = ?").unwrap();
        assert_eq!(unknown.outcome, Outcome::Unknown);
        assert_eq!(unknown.kind, CallKind::Exec);
    }

    #[test]
    fn test_non_matching_lines() {
        assert!(parse("+++ exited with 0 +++").is_none());
        assert!(parse("--- SIGCHLD {si_signo=SIGCHLD, si_code=CLD_EXITED} ---").is_none());
        assert!(parse("1234  openat(AT_FDCWD, \"/x\", O_RDONLY <unfinished ...>").is_none());
        assert!(parse("1234  <... openat resumed>) = 3").is_none());
        assert!(parse("").is_none());
        assert!(parse("strace: Process 42 attached").is_none());
    }

    #[test]
    fn test_pid_prefixes() {
        let bracketed = parse("[pid  4242] readlink(\"/usr/bin/cc\", \"gcc\", 4095) = 3").unwrap();
        assert_eq!(bracketed.kind, CallKind::ReadLink);
        assert_eq!(bracketed.arguments[0], "\"/usr/bin/cc\"");

        let bare = parse("4242  stat(\"/usr/include\", {st_mode=S_IFDIR|0755, st_size=4096}) = 0")
            .unwrap();
        assert_eq!(bare.kind, CallKind::Stat);
        assert_eq!(bare.arguments.len(), 2);
    }

    #[test]
    fn test_struct_literal_stays_whole() {
        let args = parse_args("{st_mode=S_IFREG, st_size=1}, 0)");
        assert_eq!(args, vec!["{st_mode=S_IFREG, st_size=1}", "0"]);
    }

    #[test]
    fn test_zero_args() {
        assert!(parse_args(")").is_empty());
        assert!(parse_args("   )").is_empty());
        let event = parse("getpid() = 77").unwrap();
        assert!(event.arguments.is_empty());
        assert_eq!(event.kind, CallKind::Other);
    }

    #[test]
    fn test_quoted_commas_and_parens() {
        let args = parse_args("AT_FDCWD, \"/tmp/a,b (copy).h\", O_RDONLY)");
        assert_eq!(args, vec!["AT_FDCWD", "\"/tmp/a,b (copy).h\"", "O_RDONLY"]);

        let escaped = parse_args("\"quote\\\", here\", 1)");
        assert_eq!(escaped, vec!["\"quote\\\", here\"", "1"]);
    }

    #[test]
    fn test_array_argument() {
        let event =
            parse("execve(\"/usr/bin/make\", [\"make\", \"-j4\"], 0x7ffc /* 31 vars */) = 0")
                .unwrap();
        assert_eq!(event.arguments.len(), 3);
        assert_eq!(event.arguments[1], "[\"make\", \"-j4\"]");
    }

    #[test]
    fn test_equals_inside_arguments() {
        let event = parse(
            "newfstatat(AT_FDCWD, \"/etc/passwd\", {st_mode=S_IFREG|0644, st_size=2848, ...}, 0) = 0",
        )
        .unwrap();
        assert_eq!(event.kind, CallKind::Stat);
        assert_eq!(event.outcome, Outcome::Success(0));
        assert_eq!(event.path_argument(), Some("\"/etc/passwd\""));
    }

    #[test]
    fn test_unbalanced_braces_do_not_panic() {
        let args = parse_args("{st_mode=S_IFREG, 0)");
        assert_eq!(args, vec!["{st_mode=S_IFREG, 0)"]);

        let args = parse_args("}, {, 1)");
        assert_eq!(args.len(), 1);

        assert!(StraceParser.parse_line("fstat(3, {st_mode=) = 0").is_ok());
    }

    #[test]
    fn test_bad_return_is_an_error() {
        let result = StraceParser.parse_line("mmap(NULL, 4096, PROT_READ) = 0x7f12ab000000");
        assert!(matches!(result, Err(ParseError::BadReturn(_))));
    }

    #[test]
    fn test_interleaved_calls_rejoined_per_pid() {
        let lines = [
            "101   openat(AT_FDCWD, \"/usr/include/a.h\", O_RDONLY <unfinished ...>",
            "102   openat(AT_FDCWD, \"/usr/include/b.h\", O_RDONLY <unfinished ...>",
            "102   <... openat resumed>) = 4",
            "101   <... openat resumed>) = -1 ENOENT (No such file or directory)",
            "[pid   103] read(3,  <unfinished ...>",
            "[pid   103] <... read resumed>\"data\", 4096) = 4",
        ];
        let events = crate::trace::parse_lines(&StraceParser, lines);
        assert_eq!(events.len(), 3);

        assert_eq!(events[0].path_argument(), Some("\"/usr/include/b.h\""));
        assert_eq!(events[0].outcome, Outcome::Success(4));
        assert_eq!(events[1].path_argument(), Some("\"/usr/include/a.h\""));
        assert_eq!(events[1].outcome, Outcome::Failure);
        assert_eq!(events[2].arguments, vec!["3", "\"data\"", "4096"]);
    }

    #[test]
    fn test_orphan_halves_dropped() {
        let mut split = SplitCalls::default();
        assert!(split.join("7  <... openat resumed>) = 3").is_none());
        assert!(split.join("7  openat(AT_FDCWD, \"/x\", O_RDONLY <unfinished ...>").is_none());
        assert_eq!(split.pending(), 1);
        assert_eq!(split.join("close(3) = 0").as_deref(), Some("close(3) = 0"));
    }

    #[rstest]
    #[case("open", CallKind::Open)]
    #[case("openat", CallKind::Open)]
    #[case("execve", CallKind::Exec)]
    #[case("execveat", CallKind::Exec)]
    #[case("readlink", CallKind::ReadLink)]
    #[case("readlinkat", CallKind::ReadLink)]
    #[case("stat", CallKind::Stat)]
    #[case("lstat", CallKind::Stat)]
    #[case("newfstatat", CallKind::Stat)]
    #[case("statx", CallKind::Stat)]
    #[case("close", CallKind::Other)]
    #[case("write", CallKind::Other)]
    fn test_classify(#[case] call: &str, #[case] expected: CallKind) {
        assert_eq!(classify(call), expected);
    }

    #[rstest]
    #[case("3", Outcome::Success(3))]
    #[case("0", Outcome::Success(0))]
    #[case("-1 EACCES (Permission denied)", Outcome::Failure)]
    #[case("?", Outcome::Unknown)]
    #[case("12 <unfinished ...>", Outcome::Success(12))]
    fn test_parse_return(#[case] rhs: &str, #[case] expected: Outcome) {
        assert_eq!(parse_return(rhs), Ok(expected));
    }
}
