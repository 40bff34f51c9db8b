use crate::DepsnapContext;
use crate::blacklist::Blacklist;
use crate::commands::{manifest_path, print_info, print_success, print_warning};
use crate::extract::{DependencyExtractor, EnvIndex, ExtractOptions};
use crate::manifest::{self, Manifest};
use crate::store::{self, BackingStore};
use crate::trace::{Platform, parse_file};
use crate::tracer::TracerBuilder;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Command-line choices for one capture; unset flags fall back to the
/// `[trace]` section of the configuration.
#[derive(Debug, Clone, Default)]
pub struct TraceOptions {
    pub name: Option<String>,
    pub file: Option<PathBuf>,
    pub include_project_dir: bool,
    pub no_default_blacklist: bool,
    pub no_follow: bool,
    pub no_filter: bool,
    pub timeout: Option<String>,
    pub ignore: Vec<PathBuf>,
    pub no_upload: bool,
    pub save_manifest: bool,
    pub command: Vec<String>,
}

impl TraceOptions {
    fn timeout(&self, ctx: &DepsnapContext) -> Result<Option<Duration>> {
        match &self.timeout {
            Some(raw) => humantime::parse_duration(raw)
                .map(Some)
                .with_context(|| format!("Invalid timeout: {raw}")),
            None => ctx.config.trace.timeout_duration(),
        }
    }
}

/// Trace a build, write its manifest and upload the captured files.
///
/// # Errors
///
/// Returns an error if:
/// - The tracer is missing or the build cannot be traced
/// - The trace log cannot be read
/// - The manifest cannot be written
/// - The store is misconfigured
pub fn execute(ctx: &DepsnapContext, options: &TraceOptions) -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to determine working directory")?;
    let settings = &ctx.config.trace;
    let output = manifest_path(ctx, options.file.as_deref(), &cwd);

    // Fail on a bad store before spending time on the build
    let store = if options.no_upload {
        None
    } else {
        Some(store::from_config(&ctx.config.store)?)
    };

    // Tracers take the log path relative to cwd
    let log = tempfile::Builder::new()
        .prefix(".depsnap-trace-")
        .suffix(".log")
        .tempfile_in(&cwd)
        .context("Failed to create trace log")?
        .into_temp_path();
    let log_name = log
        .file_name()
        .map(PathBuf::from)
        .context("Trace log has no file name")?;

    let tracer = TracerBuilder::new(log_name, options.command.clone())?
        .trace_subprocesses(settings.follow_subprocesses && !options.no_follow)
        .filter_calls(settings.filter_calls && !options.no_filter)
        .tracer_program(settings.tracer_path.clone())
        .timeout(options.timeout(ctx)?)
        .build()?;

    print_info(&format!("Tracing: {}", options.command.join(" ")));
    let status = tracer.trace()?;
    if !status.success() {
        tracing::warn!(code = ?status.code(), "build exited unsuccessfully");
        print_warning(&format!(
            "Build exited with {status}; capturing what it touched anyway"
        ));
    }

    let events = parse_file(Platform::current().parser().as_ref(), &log)?;

    let mut blacklist = Blacklist::load(
        &cwd,
        settings.default_blacklist && !options.no_default_blacklist,
    )?;
    for path in &options.ignore {
        blacklist.insert(path);
    }

    let mut extract_options = ExtractOptions::new(cwd.clone());
    extract_options.include_project_dir =
        settings.include_project_dir || options.include_project_dir;

    let mut extractor =
        DependencyExtractor::new(extract_options, blacklist, EnvIndex::from_process_env(&cwd));
    extractor.extract(&events);

    let command = shell_words::join(&options.command);
    let manifest = extractor.into_manifest(options.name.clone(), Some(command));
    manifest.save(&output, ctx.config.store.compression_level)?;
    print_success(&format!(
        "Captured {} files, {} links, {} variables into {}",
        manifest.entries().len(),
        manifest.links().len(),
        manifest.vars().count(),
        output.display()
    ));

    if let Some(store) = store {
        upload(&manifest, store.as_ref(), &cwd, &output, options.save_manifest)?;
    }

    Ok(())
}

fn upload(
    manifest: &Manifest,
    store: &dyn BackingStore,
    cwd: &Path,
    output: &Path,
    save_manifest: bool,
) -> Result<()> {
    let report = manifest::upload(manifest, store, cwd);
    for entry in &report.failed {
        print_warning(&format!("Failed to upload {}", entry.path.display()));
    }
    print_success(&format!(
        "Uploaded {} of {} files to {}",
        report.uploaded,
        manifest.entries().len(),
        store.name()
    ));

    if save_manifest {
        let key = output
            .file_name()
            .and_then(|name| name.to_str())
            .context("Manifest file name is not valid UTF-8")?;
        if store.store(key, output) {
            print_success(&format!("Stored manifest as '{key}'"));
        } else {
            print_warning(&format!("Failed to store manifest as '{key}'"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn context() -> DepsnapContext {
        DepsnapContext {
            config_path: PathBuf::from("/nonexistent/config.toml"),
            config: Config::default(),
        }
    }

    #[test]
    fn test_timeout_flag_overrides_config() -> Result<()> {
        let mut ctx = context();
        ctx.config.trace.timeout = Some("1h".into());

        let mut options = TraceOptions::default();
        assert_eq!(options.timeout(&ctx)?, Some(Duration::from_secs(3600)));

        options.timeout = Some("90s".into());
        assert_eq!(options.timeout(&ctx)?, Some(Duration::from_secs(90)));

        options.timeout = Some("later".into());
        assert!(options.timeout(&ctx).is_err());
        Ok(())
    }

    #[test]
    fn test_no_timeout_by_default() -> Result<()> {
        assert_eq!(TraceOptions::default().timeout(&context())?, None);
        Ok(())
    }
}
