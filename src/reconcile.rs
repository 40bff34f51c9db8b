//! Brings a workspace in line with a manifest: pulls missing dependencies
//! from the store, reports files whose content drifted, recreates symbolic
//! links and optionally relaunches the build with the recorded environment.

use crate::error::DepsnapError;
use crate::manifest::{DependencyEntry, EnvVar, Manifest};
use crate::store::BackingStore;
use crate::utils::PATH_LIST_SEPARATOR;
use crate::utils::hash::hash_file;
use crate::utils::paths::{absolutize, ensure_parent_dirs};
use anyhow::{Context, Result, bail};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{Level, debug, info, span, warn};

#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Relative manifest paths resolve against this directory
    pub cwd: PathBuf,
    /// Start the recorded command once the workspace is in place
    pub launch: bool,
}

/// A present file whose content no longer matches the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    pub path: PathBuf,
    pub expected: String,
    pub actual: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkFailure {
    pub link: PathBuf,
    pub target: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Entries that were present and matched
    pub verified: usize,
    /// Entries pulled from the store
    pub fetched: Vec<PathBuf>,
    pub mismatches: Vec<Mismatch>,
    pub links_created: usize,
    pub link_failures: Vec<LinkFailure>,
    /// Recorded variables, for the caller to display or apply
    pub vars: Vec<EnvVar>,
    /// Pid of the relaunched build
    pub launched: Option<u32>,
}

impl ReconcileReport {
    /// True when nothing needed a warning.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.mismatches.is_empty() && self.link_failures.is_empty()
    }
}

/// Verifies and repairs the workspace described by `manifest`.
///
/// Entries are handled in order. The first dependency that is missing and
/// cannot be fetched aborts the check; later entries are not looked at.
/// An entry whose path is also a recorded link is checked after the links
/// are in place, through the link.
///
/// # Errors
///
/// Returns [`DepsnapError::MissingDependency`] when a fetch fails, or an
/// error if a present file cannot be hashed or the relaunch fails.
pub fn check_config(
    manifest: &Manifest,
    store: &dyn BackingStore,
    options: &ReconcileOptions,
) -> Result<ReconcileReport> {
    let span = span!(Level::DEBUG, "check_config", store = store.name());
    let _guard = span.enter();

    let mut report = ReconcileReport::default();
    let link_paths: HashSet<PathBuf> = manifest
        .links()
        .iter()
        .map(|link| absolutize(&link.link, &options.cwd))
        .collect();

    let mut behind_links = Vec::new();
    for entry in manifest.entries() {
        let path = absolutize(&entry.path, &options.cwd);
        if link_paths.contains(&path) {
            behind_links.push((entry, path));
            continue;
        }
        check_entry(entry, path, store, &mut report)?;
    }

    for link in manifest.links() {
        let link_path = absolutize(&link.link, &options.cwd);
        let target = absolutize(&link.target, &options.cwd);
        match ensure_link(&link_path, &target) {
            Ok(true) => report.links_created += 1,
            Ok(false) => {}
            Err(e) => {
                let reason = format!("{e:#}");
                warn!(link = %link_path.display(), target = %target.display(), %reason, "could not create link");
                report.link_failures.push(LinkFailure {
                    link: link_path,
                    target,
                    reason,
                });
            }
        }
    }

    for (entry, path) in behind_links {
        check_entry(entry, path, store, &mut report)?;
    }

    report.vars = manifest.vars().cloned().collect();

    if options.launch {
        match &manifest.command {
            Some(command) => {
                let base: BTreeMap<String, String> = std::env::vars().collect();
                let env = launch_environment(&report.vars, &base, &options.cwd);
                report.launched = Some(launch(command, &env, &options.cwd)?);
            }
            None => warn!("manifest records no command; nothing to launch"),
        }
    }

    info!(
        verified = report.verified,
        fetched = report.fetched.len(),
        mismatches = report.mismatches.len(),
        "check finished"
    );
    Ok(report)
}

/// Fetches `path` if it is missing, otherwise compares its digest.
fn check_entry(
    entry: &DependencyEntry,
    path: PathBuf,
    store: &dyn BackingStore,
    report: &mut ReconcileReport,
) -> Result<()> {
    if !path.exists() {
        debug!(path = %path.display(), "missing, fetching");
        ensure_parent_dirs(&path)?;
        if !store.fetch(&entry.digest, &path) {
            return Err(DepsnapError::MissingDependency {
                digest: entry.digest.clone(),
                path,
            }
            .into());
        }
        report.fetched.push(path);
        return Ok(());
    }

    let actual = hash_file(&path)?;
    if actual == entry.digest {
        report.verified += 1;
    } else {
        warn!(
            path = %path.display(),
            expected = %entry.digest,
            %actual,
            "content differs from manifest"
        );
        report.mismatches.push(Mismatch {
            path,
            expected: entry.digest.clone(),
            actual,
        });
    }
    Ok(())
}

/// Makes `link` a symbolic link to `target`, replacing a link that points
/// elsewhere. Returns false if it already was the right one. A file that is
/// not a link is left alone and reported.
fn ensure_link(link: &Path, target: &Path) -> Result<bool> {
    match fs::symlink_metadata(link) {
        Ok(meta) if meta.file_type().is_symlink() => {
            let existing = fs::read_link(link)
                .with_context(|| format!("Failed to read link {}", link.display()))?;
            let parent = link.parent().unwrap_or(link);
            if absolutize(&existing, parent) == target {
                debug!(link = %link.display(), "link already in place");
                return Ok(false);
            }
            debug!(link = %link.display(), stale = %existing.display(), "replacing stale link");
            fs::remove_file(link)
                .with_context(|| format!("Failed to remove stale link {}", link.display()))?;
        }
        Ok(_) => bail!("{} exists and is not a symbolic link", link.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => ensure_parent_dirs(link)?,
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to inspect {}", link.display()));
        }
    }

    create_symlink(target, link)
        .with_context(|| format!("Failed to link {} -> {}", link.display(), target.display()))?;
    debug!(link = %link.display(), target = %target.display(), "created link");
    Ok(true)
}

#[cfg(unix)]
fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}

/// Computes the variables to set for a relaunch.
///
/// Each recorded value is absolutized against `cwd`. A search-path variable
/// is put in front of whatever `base` (or an earlier recorded value) already
/// holds; any other variable replaces it. Only the variables that change are
/// returned.
#[must_use]
pub fn launch_environment(
    vars: &[EnvVar],
    base: &BTreeMap<String, String>,
    cwd: &Path,
) -> BTreeMap<String, String> {
    let mut overrides: BTreeMap<String, String> = BTreeMap::new();

    for var in vars {
        let value = absolutize(Path::new(&var.value), cwd)
            .to_string_lossy()
            .into_owned();
        let current = overrides
            .get(&var.name)
            .or_else(|| base.get(&var.name))
            .filter(|current| !current.is_empty());

        let merged = match current {
            Some(current) if var.append_with_separator => {
                format!("{value}{PATH_LIST_SEPARATOR}{current}")
            }
            _ => value,
        };
        overrides.insert(var.name.clone(), merged);
    }
    overrides
}

/// Starts `command` in `cwd` with `env` layered over our environment.
/// The build is left running; its pid is returned.
///
/// # Errors
///
/// Returns an error if the command line cannot be split or spawned.
#[allow(clippy::zombie_processes)]
pub fn launch(command: &str, env: &BTreeMap<String, String>, cwd: &Path) -> Result<u32> {
    let words = shell_words::split(command)
        .with_context(|| format!("Failed to parse command line: {command}"))?;
    let (program, args) = words
        .split_first()
        .with_context(|| format!("Empty command line: '{command}'"))?;

    let child = Command::new(program)
        .args(args)
        .envs(env)
        .current_dir(cwd)
        .spawn()
        .with_context(|| format!("Failed to launch {program}"))?;
    info!(pid = child.id(), %program, "launched build");
    Ok(child.id())
}
