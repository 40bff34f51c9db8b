use super::{ForwardedChild, TraceSettings, Tracer};
use anyhow::Result;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use tracing::{Level, debug, span};

/// Calls the extractor consumes. The `?` prefix makes strace skip names the
/// architecture does not have (aarch64 lacks `open`, `stat` and friends).
pub const TRACED_CALLS: &str =
    "trace=?open,openat,execve,execveat,?readlink,readlinkat,?stat,?lstat,fstat,newfstatat,statx";

/// Traces with `strace`, which follows forks itself.
#[derive(Debug, Clone)]
pub struct StraceTracer {
    program: PathBuf,
    settings: TraceSettings,
}

impl StraceTracer {
    #[must_use]
    pub const fn new(program: PathBuf, settings: TraceSettings) -> Self {
        Self { program, settings }
    }

    /// Arguments passed to strace, traced command included.
    #[must_use]
    pub fn command_line(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-o".into(), self.settings.log_file.clone().into()];
        if self.settings.trace_subprocesses {
            args.push("-f".into());
        }
        if self.settings.filter_calls {
            args.push("-e".into());
            args.push(TRACED_CALLS.into());
        }
        args.extend(self.settings.command.iter().map(OsString::from));
        args
    }
}

impl Tracer for StraceTracer {
    fn trace(&self) -> Result<ExitStatus> {
        let span = span!(Level::DEBUG, "strace", log = %self.settings.log_file.display());
        let _guard = span.enter();

        let args = self.command_line();
        debug!(program = %self.program.display(), ?args, "starting strace");
        let child = ForwardedChild::spawn(Command::new(&self.program).args(&args))?;
        child.wait(self.settings.timeout)
    }

    fn log_file(&self) -> &Path {
        &self.settings.log_file
    }
}
