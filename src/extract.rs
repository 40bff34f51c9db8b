//! Turns a stream of trace events into a deduplicated, portable dependency
//! set.
//!
//! Every candidate path passes through the same gate before it is recorded:
//!
//! 1. blacklisted paths are dropped
//! 2. anything that is not a regular file right now is dropped
//! 3. files inside the project directory are dropped unless asked for
//! 4. absolute paths sharing a leading directory with the working directory
//!    are rewritten relative to it, so a checkout under another user's home
//!    still lines up
//! 5. paths already recorded are dropped
//!
//! Accepted paths (and their parent directories) are then looked up in an
//! index of the environment, to find variables such as `PATH` or `CC` that
//! the build depends on. This happens even when the file cannot be hashed
//! afterwards. Links are deduplicated by link path among links only, so a
//! path that was both opened and read as a link is an entry and a link.

use crate::blacklist::Blacklist;
use crate::manifest::{DependencyEntry, EnvVar, LinkEntry, Manifest};
use crate::trace::{CallKind, TraceEvent, unquote};
use crate::utils::PATH_LIST_SEPARATOR;
use crate::utils::hash::{hash_file, is_not_found};
use crate::utils::paths::{absolutize, is_within_directory, normalize, relative_to, shares_prefix};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Minimum number of leading directories an absolute path must share with
/// the working directory before it is relativized.
const MIN_SHARED_PREFIX: usize = 1;

/// What to put in an entry's `display_name`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DisplayNamePolicy {
    #[default]
    None,
    /// The file name component of the recorded path
    FileName,
}

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Directory the build ran in; relative paths resolve against it
    pub cwd: PathBuf,
    /// Record files that live inside `cwd`
    pub include_project_dir: bool,
    /// Paths under this directory are never recorded (the Windows OS tree)
    pub system_root: Option<PathBuf>,
    pub display_name_policy: DisplayNamePolicy,
}

impl ExtractOptions {
    #[must_use]
    pub fn new(cwd: PathBuf) -> Self {
        Self {
            cwd,
            include_project_dir: false,
            system_root: default_system_root(),
            display_name_policy: DisplayNamePolicy::default(),
        }
    }
}

/// `%SystemRoot%` on Windows, nothing elsewhere.
#[must_use]
pub fn default_system_root() -> Option<PathBuf> {
    if !cfg!(windows) {
        return None;
    }
    let root = std::env::var_os("SystemRoot")
        .or_else(|| std::env::var_os("windir"))
        .map_or_else(|| PathBuf::from("C:\\Windows"), PathBuf::from);
    Some(root)
}

/// Maps every path mentioned in the environment back to the variable that
/// mentions it.
#[derive(Debug, Clone, Default)]
pub struct EnvIndex {
    by_path: HashMap<PathBuf, String>,
    /// Variables whose value lists more than one path
    search_paths: HashSet<String>,
}

impl EnvIndex {
    /// Builds the index from `(name, value)` pairs.
    ///
    /// Values are split on the platform list separator; relative segments
    /// resolve against `cwd`. When two variables mention the same path, the
    /// one whose name sorts first wins, so the result does not depend on
    /// iteration order.
    pub fn from_vars<I, K, V>(vars: I, cwd: &Path) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        let mut sorted: Vec<(String, V)> = vars.into_iter().map(|(k, v)| (k.into(), v)).collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));

        let mut index = Self::default();
        for (name, value) in sorted {
            let segments: Vec<&str> = value
                .as_ref()
                .split(PATH_LIST_SEPARATOR)
                .filter(|segment| !segment.is_empty())
                .collect();
            if segments.len() > 1 {
                index.search_paths.insert(name.clone());
            }
            for segment in segments {
                let path = absolutize(Path::new(segment), cwd);
                index.by_path.entry(path).or_insert_with(|| name.clone());
            }
        }
        tracing::debug!(paths = index.by_path.len(), "indexed environment");
        index
    }

    /// Indexes the environment of the running process. Variables that are
    /// not valid Unicode are skipped.
    #[must_use]
    pub fn from_process_env(cwd: &Path) -> Self {
        Self::from_vars(std::env::vars(), cwd)
    }

    /// Variable mentioning exactly `path`, and whether it is a search path.
    #[must_use]
    pub fn lookup(&self, path: &Path) -> Option<(&str, bool)> {
        self.by_path
            .get(path)
            .map(|name| (name.as_str(), self.search_paths.contains(name)))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }
}

/// Everything extracted so far.
#[derive(Debug, Default)]
pub struct DependencySet {
    entries: Vec<DependencyEntry>,
    recorded: HashSet<PathBuf>,
    links: Vec<LinkEntry>,
    linked: HashSet<PathBuf>,
    vars: BTreeSet<EnvVar>,
}

impl DependencySet {
    #[must_use]
    pub fn entries(&self) -> &[DependencyEntry] {
        &self.entries
    }

    #[must_use]
    pub fn links(&self) -> &[LinkEntry] {
        &self.links
    }

    #[must_use]
    pub fn vars(&self) -> &BTreeSet<EnvVar> {
        &self.vars
    }

    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        self.recorded.contains(path)
    }
}

pub struct DependencyExtractor {
    options: ExtractOptions,
    blacklist: Blacklist,
    env: EnvIndex,
    found: DependencySet,
}

impl DependencyExtractor {
    #[must_use]
    pub fn new(options: ExtractOptions, blacklist: Blacklist, env: EnvIndex) -> Self {
        Self {
            options,
            blacklist,
            env,
            found: DependencySet::default(),
        }
    }

    /// Feeds events through the pipeline. Calling it again with the same
    /// events changes nothing.
    pub fn extract(&mut self, events: &[TraceEvent]) {
        let span = tracing::span!(tracing::Level::DEBUG, "extract", events = events.len());
        let _guard = span.enter();

        for event in events {
            if !event.outcome.is_success() {
                continue;
            }
            match event.kind {
                CallKind::Open | CallKind::Exec | CallKind::Stat => self.record_file(event),
                CallKind::ReadLink => self.record_link(event),
                CallKind::Other => {}
            }
        }

        tracing::debug!(
            entries = self.found.entries.len(),
            links = self.found.links.len(),
            vars = self.found.vars.len(),
            "extraction finished"
        );
    }

    #[must_use]
    pub fn dependencies(&self) -> &DependencySet {
        &self.found
    }

    /// Moves everything extracted into a fresh manifest.
    #[must_use]
    pub fn into_manifest(self, project_name: Option<String>, command: Option<String>) -> Manifest {
        let mut manifest = Manifest::new(project_name, command);
        for entry in self.found.entries {
            manifest.add_entry(entry);
        }
        for link in self.found.links {
            manifest.add_link(link);
        }
        for var in self.found.vars {
            manifest.add_var(var);
        }
        manifest
    }

    fn record_file(&mut self, event: &TraceEvent) {
        let Some(original) = event.path_argument().and_then(unquote) else {
            return;
        };
        let original = PathBuf::from(original);
        let Some(path) = self.gate(&original) else {
            return;
        };
        if self.found.recorded.contains(&path) {
            return;
        }
        self.infer_vars(&path);

        // hash what the build actually opened, before any rewriting
        let digest = match hash_file(&self.options.cwd.join(&original)) {
            Ok(digest) => digest,
            Err(e) if is_not_found(&e) => {
                tracing::debug!(path = %original.display(), "vanished before hashing");
                return;
            }
            Err(e) => {
                tracing::debug!(path = %original.display(), error = %format!("{e:#}"), "unreadable, skipping");
                return;
            }
        };

        let display_name = match self.options.display_name_policy {
            DisplayNamePolicy::None => None,
            DisplayNamePolicy::FileName => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned()),
        };
        tracing::debug!(path = %path.display(), %digest, "recorded dependency");
        self.found.recorded.insert(path.clone());
        self.found.entries.push(DependencyEntry {
            display_name,
            digest,
            is_relative: path.is_relative(),
            path,
        });
    }

    fn record_link(&mut self, event: &TraceEvent) {
        let Some(link) = event.path_argument().and_then(unquote).map(PathBuf::from) else {
            return;
        };
        let Some(target) = event.link_target_argument().and_then(unquote).map(PathBuf::from)
        else {
            return;
        };

        let target = if target.is_absolute() {
            target
        } else {
            let parent = absolutize(&link, &self.options.cwd);
            let parent = parent.parent().unwrap_or(&parent);
            parent.join(target)
        };

        let Some(link) = self.gate(&link) else {
            return;
        };
        let Some(target) = self.gate(&target) else {
            return;
        };
        if !self.found.linked.insert(link.clone()) {
            return;
        }

        self.infer_vars(&link);
        self.infer_vars(&target);
        tracing::debug!(link = %link.display(), target = %target.display(), "recorded link");
        self.found.links.push(LinkEntry { link, target });
    }

    /// Steps one to four of the gate; returns the spelling to record.
    fn gate(&self, path: &Path) -> Option<PathBuf> {
        let path = normalize(path);
        let cwd = &self.options.cwd;
        let absolute = absolutize(&path, cwd);

        if let Some(system_root) = &self.options.system_root
            && is_under_case_insensitive(&absolute, system_root)
        {
            return None;
        }

        if self.blacklist.contains(&absolute) {
            tracing::trace!(path = %path.display(), "blacklisted");
            return None;
        }

        if !fs::metadata(&absolute).is_ok_and(|meta| meta.is_file()) {
            tracing::trace!(path = %path.display(), "not a regular file");
            return None;
        }

        if !self.options.include_project_dir && is_within_directory(&absolute, cwd) {
            tracing::trace!(path = %path.display(), "inside the project directory");
            return None;
        }

        if path.is_absolute() && shares_prefix(&path, cwd, cwd, MIN_SHARED_PREFIX) {
            return relative_to(&path, cwd).or(Some(path));
        }
        Some(path)
    }

    /// Records every variable that names `path` or its parent directory,
    /// looked up both as recorded and absolutized.
    fn infer_vars(&mut self, path: &Path) {
        let cwd = &self.options.cwd;
        let mut candidates = vec![path.to_path_buf()];
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            candidates.push(parent.to_path_buf());
        }

        for recorded in candidates {
            let absolute = absolutize(&recorded, cwd);
            for key in [&recorded, &absolute] {
                if let Some((name, search_path)) = self.env.lookup(key) {
                    let var = EnvVar {
                        name: name.to_string(),
                        value: recorded.to_string_lossy().into_owned(),
                        append_with_separator: search_path,
                    };
                    if self.found.vars.insert(var) {
                        tracing::debug!(name, value = %recorded.display(), "inferred variable");
                    }
                }
            }
        }
    }
}

fn is_under_case_insensitive(path: &Path, root: &Path) -> bool {
    let path = PathBuf::from(path.to_string_lossy().to_lowercase());
    let root = PathBuf::from(root.to_string_lossy().to_lowercase());
    path.starts_with(root)
}
