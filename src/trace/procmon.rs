//! Parser and post-filter for Process Monitor CSV exports.
//!
//! Process Monitor records the whole system, so after a trace the exported
//! CSV is narrowed down to the traced process tree before parsing. A record
//! looks like:
//!
//! ```text
//! "1:41:00.4573350 PM","cl.exe","7572","CreateFile","C:\src\a.h","SUCCESS","2422"
//! ```
//!
//! with the parent pid in the last column.

use super::{CallKind, Outcome, ParseError, TraceEvent, TraceParser};
use std::collections::HashSet;

const TIME: usize = 0;
const PROCESS: usize = 1;
const PID: usize = 2;
const OPERATION: usize = 3;
const PATH: usize = 4;
const RESULT: usize = 5;

/// Images belonging to the monitor itself.
const MONITOR_PROCESSES: &[&str] = &["Procmon.exe", "Procmon64.exe"];

#[derive(Debug, Clone, Copy, Default)]
pub struct ProcmonParser;

impl TraceParser for ProcmonParser {
    fn parse_line(&self, line: &str) -> Result<Option<TraceEvent>, ParseError> {
        let Some(fields) = split_record(line) else {
            return Ok(None);
        };
        let operation = *fields
            .get(OPERATION)
            .ok_or(ParseError::MissingField("operation"))?;
        let path = fields.get(PATH).ok_or(ParseError::MissingField("path"))?;
        let result = fields
            .get(RESULT)
            .ok_or(ParseError::MissingField("result"))?;

        let outcome = if *result == "SUCCESS" {
            Outcome::Success(0)
        } else {
            Outcome::Failure
        };

        Ok(Some(TraceEvent {
            call: operation.to_string(),
            kind: classify_operation(operation),
            // quoted and escaped like strace paths so the extractor handles both alike
            arguments: vec![format!("\"{}\"", path.replace('\\', "\\\\"))],
            outcome,
        }))
    }
}

/// Splits a record into its fields.
///
/// Returns `None` for the header line, for events emitted by the monitor
/// itself and for anything that is not a quoted CSV record.
#[must_use]
pub fn split_record(line: &str) -> Option<Vec<&str>> {
    let inner = line.trim_end().strip_prefix('"')?.strip_suffix('"')?;
    let fields: Vec<&str> = inner.split("\",\"").collect();

    // data rows start with a timestamp; the header starts with "Time of Day"
    if !fields[TIME].starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    let process = fields.get(PROCESS)?;
    if MONITOR_PROCESSES
        .iter()
        .any(|monitor| process.eq_ignore_ascii_case(monitor))
    {
        return None;
    }
    Some(fields)
}

/// Maps a Process Monitor operation onto a call kind.
///
/// There is no readlink counterpart; reparse points are resolved by the
/// filesystem before CreateFile returns.
#[must_use]
pub fn classify_operation(operation: &str) -> CallKind {
    match operation {
        "CreateFile" => CallKind::Open,
        "Process Create" | "Load Image" => CallKind::Exec,
        "QueryBasicInformationFile"
        | "QueryStandardInformationFile"
        | "QueryNetworkOpenInformationFile"
        | "QueryAllInformationFile" => CallKind::Stat,
        _ => CallKind::Other,
    }
}

/// `(pid, parent pid)` of a record, if both columns are numeric.
fn pid_pair(fields: &[&str]) -> Option<(u32, u32)> {
    let pid = fields.get(PID)?.parse().ok()?;
    let parent = fields.last()?.parse().ok()?;
    Some((pid, parent))
}

/// Every pid descending from `root`, root included.
///
/// Grows the set until no `(pid, parent)` pair adds a new member, so the
/// order of `pairs` does not matter.
#[must_use]
pub fn descendant_pids(root: u32, pairs: &[(u32, u32)]) -> HashSet<u32> {
    let mut pids = HashSet::from([root]);
    loop {
        let before = pids.len();
        for &(pid, parent) in pairs {
            if pids.contains(&parent) {
                pids.insert(pid);
            }
        }
        if pids.len() == before {
            return pids;
        }
    }
}

/// Keeps the records produced by `root` (and, when `follow_subprocesses` is
/// set, by its descendants). With `filter_calls`, records whose operation is
/// not one the extractor consumes are dropped as well.
#[must_use]
pub fn filter_log<'a, I>(
    lines: I,
    root: u32,
    follow_subprocesses: bool,
    filter_calls: bool,
) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let records: Vec<(&str, Vec<&str>)> = lines
        .into_iter()
        .filter_map(|line| split_record(line).map(|fields| (line, fields)))
        .collect();

    let tracked = if follow_subprocesses {
        let pairs: Vec<(u32, u32)> = records
            .iter()
            .filter_map(|(_, fields)| pid_pair(fields))
            .collect();
        descendant_pids(root, &pairs)
    } else {
        HashSet::from([root])
    };

    records
        .into_iter()
        .filter(|(_, fields)| {
            fields
                .get(PID)
                .and_then(|pid| pid.parse::<u32>().ok())
                .is_some_and(|pid| tracked.contains(&pid))
        })
        .filter(|(_, fields)| {
            !filter_calls
                || fields
                    .get(OPERATION)
                    .is_some_and(|op| classify_operation(op) != CallKind::Other)
        })
        .map(|(line, _)| line.to_string())
        .collect()
}
