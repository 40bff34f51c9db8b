use super::{ForwardedChild, TraceSettings, Tracer};
use crate::error::DepsnapError;
use crate::trace::procmon::filter_log;
use crate::utils::decode_line;
use anyhow::{Context, Result};
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use tempfile::TempPath;
use tracing::{Level, debug, span, warn};

/// Traces with Process Monitor.
///
/// Process Monitor records the whole machine, so the export is narrowed to
/// the traced process tree afterwards.
#[derive(Debug, Clone)]
pub struct ProcmonTracer {
    program: PathBuf,
    settings: TraceSettings,
}

impl ProcmonTracer {
    #[must_use]
    pub const fn new(program: PathBuf, settings: TraceSettings) -> Self {
        Self { program, settings }
    }

    fn monitor(&self, args: &[&OsStr]) -> Command {
        let mut command = Command::new(&self.program);
        command.args(args).stdin(Stdio::null());
        command
    }

    /// Runs a short-lived monitor control command to completion.
    fn control(&self, args: &[&OsStr]) -> Result<()> {
        debug!(?args, "procmon control");
        let status = self
            .monitor(args)
            .status()
            .map_err(|e| DepsnapError::Trace(format!("failed to run Process Monitor: {e}")))?;
        if !status.success() {
            warn!(?args, code = ?status.code(), "Process Monitor reported failure");
        }
        Ok(())
    }

    fn start_capture(&self, backing_file: &Path) -> Result<Child> {
        let child = self
            .monitor(&[
                OsStr::new("/AcceptEula"),
                OsStr::new("/Quiet"),
                OsStr::new("/Minimized"),
                OsStr::new("/BackingFile"),
                backing_file.as_os_str(),
            ])
            .spawn()
            .map_err(|e| DepsnapError::Trace(format!("failed to start Process Monitor: {e}")))?;
        self.control(&[OsStr::new("/WaitForIdle")])?;
        Ok(child)
    }

    fn stop_capture(&self, mut capture: Child) -> Result<()> {
        self.control(&[OsStr::new("/Terminate")])?;
        if let Err(e) = capture.wait() {
            debug!(error = %e, "capture process already gone");
        }
        Ok(())
    }

    /// Narrows the exported CSV to the traced process tree and writes what
    /// remains to the log file.
    fn write_filtered_log(&self, csv: &Path, root: u32) -> Result<()> {
        let bytes =
            fs::read(csv).with_context(|| format!("Failed to read export {}", csv.display()))?;
        let text = decode_line(&bytes);
        let text = text.trim_start_matches('\u{feff}');

        let kept = filter_log(
            text.lines(),
            root,
            self.settings.trace_subprocesses,
            self.settings.filter_calls,
        );
        debug!(kept = kept.len(), "filtered Process Monitor export");

        let mut out = kept.join("\n");
        out.push('\n');
        fs::write(&self.settings.log_file, out).with_context(|| {
            format!("Failed to write trace log {}", self.settings.log_file.display())
        })
    }
}

fn temp_file_beside(log_file: &Path, suffix: &str) -> Result<TempPath> {
    let dir = match log_file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let file = tempfile::Builder::new()
        .prefix(".depsnap-procmon-")
        .suffix(suffix)
        .tempfile_in(dir)
        .context("Failed to create Process Monitor scratch file")?;
    Ok(file.into_temp_path())
}

impl Tracer for ProcmonTracer {
    fn trace(&self) -> Result<ExitStatus> {
        let span = span!(Level::DEBUG, "procmon", log = %self.settings.log_file.display());
        let _guard = span.enter();

        // both removed on drop, whatever happens below
        let pml = temp_file_beside(&self.settings.log_file, ".pml")?;
        let csv = temp_file_beside(&self.settings.log_file, ".csv")?;

        let capture = self.start_capture(&pml)?;

        let (program, args) = self
            .settings
            .command
            .split_first()
            .ok_or_else(|| DepsnapError::InvalidTracerArguments("no command to trace".into()))?;
        let run = ForwardedChild::spawn(Command::new(program).args(args));
        let (root, status) = match run {
            Ok(child) => {
                let root = child.id();
                (root, child.wait(self.settings.timeout))
            }
            Err(e) => {
                self.stop_capture(capture)?;
                return Err(e);
            }
        };
        self.stop_capture(capture)?;
        let status = status?;

        self.control(&[
            OsStr::new("/OpenLog"),
            pml.as_os_str(),
            OsStr::new("/SaveAs"),
            csv.as_os_str(),
        ])?;
        self.write_filtered_log(&csv, root)?;
        Ok(status)
    }

    fn log_file(&self) -> &Path {
        &self.settings.log_file
    }
}
