//! Runs a build under the platform's system-call tracer.
//!
//! A [`Tracer`] leaves a raw log at the path it was built with; turning that
//! log into events is the job of [`crate::trace`]. The traced command's
//! stdout is forwarded to ours while it runs.

pub mod linux;
pub mod windows;

use crate::error::DepsnapError;
use crate::trace::Platform;
use crate::utils::decode_line;
use anyhow::Result;
use command_group::{CommandGroup, GroupChild};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{ChildStdout, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{Level, debug, info, span, warn};

pub use linux::StraceTracer;
pub use windows::ProcmonTracer;

/// How often a running build is polled when a timeout is set.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub trait Tracer {
    /// Runs the command to completion and returns its exit status.
    ///
    /// # Errors
    ///
    /// Fails if the tracer or the command cannot be started or waited on,
    /// or with [`DepsnapError::TraceTimeout`] if the build outlives the
    /// configured limit.
    fn trace(&self) -> Result<ExitStatus>;

    /// Where the raw log ends up.
    fn log_file(&self) -> &Path;
}

/// Settings shared by every tracer.
#[derive(Debug, Clone)]
pub struct TraceSettings {
    pub log_file: PathBuf,
    pub command: Vec<String>,
    pub trace_subprocesses: bool,
    pub filter_calls: bool,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct TracerBuilder {
    settings: TraceSettings,
    tracer_program: Option<PathBuf>,
}

impl TracerBuilder {
    /// Starts a builder for tracing `command` into `log_file`.
    ///
    /// # Errors
    ///
    /// Returns [`DepsnapError::InvalidTracerArguments`] if the log file name
    /// is empty or contains whitespace, or if the command is empty.
    pub fn new(log_file: impl Into<PathBuf>, command: Vec<String>) -> Result<Self> {
        let log_file = log_file.into();
        let name = log_file.to_string_lossy();
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(DepsnapError::InvalidTracerArguments(format!(
                "log file name '{name}' must be non-empty and free of whitespace"
            ))
            .into());
        }
        if command.first().is_none_or(String::is_empty) {
            return Err(
                DepsnapError::InvalidTracerArguments("no command to trace".to_string()).into(),
            );
        }

        Ok(Self {
            settings: TraceSettings {
                log_file,
                command,
                trace_subprocesses: true,
                filter_calls: true,
                timeout: None,
            },
            tracer_program: None,
        })
    }

    #[must_use]
    pub const fn trace_subprocesses(mut self, enabled: bool) -> Self {
        self.settings.trace_subprocesses = enabled;
        self
    }

    #[must_use]
    pub const fn filter_calls(mut self, enabled: bool) -> Self {
        self.settings.filter_calls = enabled;
        self
    }

    /// Uses this tracer executable instead of searching `PATH`.
    #[must_use]
    pub fn tracer_program(mut self, program: Option<PathBuf>) -> Self {
        self.tracer_program = program;
        self
    }

    #[must_use]
    pub const fn timeout(mut self, limit: Option<Duration>) -> Self {
        self.settings.timeout = limit;
        self
    }

    #[must_use]
    pub const fn settings(&self) -> &TraceSettings {
        &self.settings
    }

    /// Creates the tracer for the running platform.
    ///
    /// # Errors
    ///
    /// Returns [`DepsnapError::TracerUnavailable`] if the tracing utility
    /// cannot be found.
    pub fn build(self) -> Result<Box<dyn Tracer>> {
        match Platform::current() {
            Platform::Linux => {
                let program = locate(self.tracer_program.as_deref(), &["strace"])?;
                Ok(Box::new(StraceTracer::new(program, self.settings)))
            }
            Platform::Windows => {
                let program =
                    locate(self.tracer_program.as_deref(), &["Procmon64.exe", "Procmon.exe"])?;
                Ok(Box::new(ProcmonTracer::new(program, self.settings)))
            }
        }
    }
}

/// Resolves the tracer executable: the override if given, otherwise the
/// first candidate found on `PATH`.
fn locate(program: Option<&Path>, candidates: &[&str]) -> Result<PathBuf> {
    if let Some(program) = program {
        return which::which(program).map_err(|_| {
            DepsnapError::TracerUnavailable(program.display().to_string()).into()
        });
    }
    candidates
        .iter()
        .find_map(|name| which::which(name).ok())
        .ok_or_else(|| DepsnapError::TracerUnavailable(candidates.join(" or ")).into())
}

/// A spawned process group whose stdout is being forwarded to ours by a
/// dedicated thread.
pub(crate) struct ForwardedChild {
    group: GroupChild,
    drain: Option<JoinHandle<()>>,
    program: String,
}

impl ForwardedChild {
    /// Spawns `command` in its own process group with stdin inherited.
    pub(crate) fn spawn(command: &mut Command) -> Result<Self> {
        let program = command.get_program().to_string_lossy().into_owned();
        let span = span!(Level::DEBUG, "spawn_traced", program = %program);
        let _guard = span.enter();

        let mut group = command
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .group_spawn()
            .map_err(|e| DepsnapError::Trace(format!("failed to spawn {program}: {e}")))?;

        let drain = group.inner().stdout.take().map(|stdout| {
            thread::Builder::new()
                .name("depsnap-stdout".into())
                .spawn(move || forward_lines(stdout))
        });
        let drain = match drain {
            Some(Ok(handle)) => Some(handle),
            Some(Err(e)) => {
                warn!(error = %e, "could not start output forwarding");
                None
            }
            None => None,
        };

        info!(pid = group.id(), "traced process started");
        Ok(Self {
            group,
            drain,
            program,
        })
    }

    pub(crate) fn id(&self) -> u32 {
        self.group.id()
    }

    /// Blocks until the process exits. With a limit, polls instead and kills
    /// the whole group once the limit passes.
    pub(crate) fn wait(mut self, timeout: Option<Duration>) -> Result<ExitStatus> {
        let status = match timeout {
            None => self.group.wait().map_err(|e| self.wait_error(&e))?,
            Some(limit) => {
                let started = Instant::now();
                loop {
                    if let Some(status) = self.group.try_wait().map_err(|e| self.wait_error(&e))? {
                        break status;
                    }
                    if started.elapsed() >= limit {
                        warn!(program = %self.program, ?limit, "timed out, killing process group");
                        if let Err(e) = self.group.kill() {
                            debug!(error = %e, "kill failed; process may have just exited");
                        }
                        let _ = self.group.wait();
                        self.join_drain();
                        return Err(DepsnapError::TraceTimeout(limit).into());
                    }
                    thread::sleep(POLL_INTERVAL);
                }
            }
        };

        self.join_drain();
        debug!(code = ?status.code(), "traced process exited");
        Ok(status)
    }

    fn wait_error(&self, e: &io::Error) -> anyhow::Error {
        DepsnapError::Trace(format!("failed to wait for {}: {e}", self.program)).into()
    }

    fn join_drain(&mut self) {
        if let Some(handle) = self.drain.take()
            && handle.join().is_err()
        {
            debug!("output forwarding thread panicked");
        }
    }
}

fn forward_lines(stdout: ChildStdout) {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let line = decode_line(&buf);
                let mut out = io::stdout().lock();
                if out.write_all(line.as_bytes()).is_err() {
                    break;
                }
                let _ = out.flush();
            }
            Err(e) => {
                debug!(error = %e, "stopped forwarding output");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(parts: &[&str]) -> Vec<String> {
        parts.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_builder_validates_log_file() {
        for bad in ["", "has space.log", "tab\t.log"] {
            let err = TracerBuilder::new(bad, command(&["make"])).unwrap_err();
            assert!(matches!(
                err.downcast_ref::<DepsnapError>(),
                Some(DepsnapError::InvalidTracerArguments(_))
            ));
        }
    }

    #[test]
    fn test_builder_validates_command() {
        let err = TracerBuilder::new("trace.log", Vec::new()).unwrap_err();
        assert_eq!(err.downcast_ref::<DepsnapError>().map(DepsnapError::exit_code), Some(2));
        assert!(TracerBuilder::new("trace.log", command(&[""])).is_err());
    }

    #[test]
    fn test_builder_defaults_and_options() {
        let builder = TracerBuilder::new("trace.log", command(&["make", "all"]))
            .unwrap()
            .trace_subprocesses(false)
            .timeout(Some(Duration::from_secs(5)));
        let settings = builder.settings();
        assert!(!settings.trace_subprocesses);
        assert!(settings.filter_calls);
        assert_eq!(settings.timeout, Some(Duration::from_secs(5)));
        assert_eq!(settings.command, command(&["make", "all"]));
    }

    #[test]
    fn test_missing_tracer_program() {
        let err = locate(Some(Path::new("/definitely/not/a/tracer")), &["strace"]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DepsnapError>(),
            Some(DepsnapError::TracerUnavailable(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_forwarded_child_exit_status() -> Result<()> {
        let child = ForwardedChild::spawn(Command::new("sh").args(["-c", "exit 3"]))?;
        let status = child.wait(None)?;
        assert_eq!(status.code(), Some(3));
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_forwarded_child_timeout_kills_group() {
        let child = ForwardedChild::spawn(Command::new("sh").args(["-c", "sleep 30"])).unwrap();
        let started = Instant::now();
        let err = child.wait(Some(Duration::from_millis(200))).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DepsnapError>(),
            Some(DepsnapError::TraceTimeout(_))
        ));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_spawn_failure_is_trace_error() {
        let result = ForwardedChild::spawn(&mut Command::new("/definitely/not/a/program"));
        let err = result.err().unwrap();
        assert!(matches!(
            err.downcast_ref::<DepsnapError>(),
            Some(DepsnapError::Trace(_))
        ));
    }
}
