//! Paths that are never recorded as dependencies.
//!
//! A blacklisted directory excludes everything beneath it. Entries come from a
//! small built-in list of volatile system files (optional) and from the
//! `.depsnapignore` file in the working directory, when one exists.

use crate::utils::paths::absolutize;
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the per-project ignore file, looked up in the working directory.
pub const BLACKLIST_FILE_NAME: &str = ".depsnapignore";

/// Pseudo-files whose content describes the machine rather than the build.
pub const DEFAULT_BLACKLIST: &[&str] = &[
    "/proc/meminfo",
    "/proc/self",
    "/dev/null",
    "/dev/random",
    "/dev/urandom",
    "/dev/tty",
];

#[derive(Debug, Clone)]
pub struct Blacklist {
    /// Absolute, normalized blacklisted paths
    paths: HashSet<PathBuf>,
    /// Directory relative paths are resolved against
    base: PathBuf,
}

impl Blacklist {
    /// Empty blacklist resolving relative paths against `base`.
    #[must_use]
    pub fn new(base: &Path) -> Self {
        Self {
            paths: HashSet::new(),
            base: base.to_path_buf(),
        }
    }

    /// Builds the blacklist for a trace run in `cwd`.
    ///
    /// # Errors
    ///
    /// Returns an error if `.depsnapignore` exists but cannot be read.
    pub fn load(cwd: &Path, include_defaults: bool) -> Result<Self> {
        let mut blacklist = Self::new(cwd);

        if include_defaults {
            for path in DEFAULT_BLACKLIST {
                blacklist.insert(Path::new(path));
            }
        }

        let ignore_file = cwd.join(BLACKLIST_FILE_NAME);
        if ignore_file.is_file() {
            tracing::debug!(file = %ignore_file.display(), "reading blacklist file");
            blacklist.read_file(&ignore_file)?;
        } else {
            tracing::debug!("no blacklist file");
        }

        Ok(blacklist)
    }

    /// Adds every path listed in `file`, one per line. Blank lines and lines
    /// starting with `#` are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn read_file(&mut self, file: &Path) -> Result<()> {
        let content = fs::read_to_string(file)
            .with_context(|| format!("Failed to read blacklist {}", file.display()))?;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            self.insert(Path::new(line));
        }
        Ok(())
    }

    pub fn insert(&mut self, path: &Path) {
        self.paths.insert(absolutize(path, &self.base));
    }

    /// True if `path` or any of its ancestors is blacklisted.
    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        if self.paths.is_empty() {
            return false;
        }
        let absolute = absolutize(path, &self.base);
        absolute.ancestors().any(|ancestor| self.paths.contains(ancestor))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_directory_inheritance() {
        let mut blacklist = Blacklist::new(Path::new("/work"));
        blacklist.insert(Path::new("/opt/tool"));

        assert!(blacklist.contains(Path::new("/opt/tool")));
        assert!(blacklist.contains(Path::new("/opt/tool/sub/file")));
        assert!(blacklist.contains(Path::new("/opt/tool/./sub/../file")));
        assert!(!blacklist.contains(Path::new("/opt/toolbox/file")));
        assert!(!blacklist.contains(Path::new("/opt")));
    }

    #[test]
    fn test_relative_paths_resolve_against_base() {
        let mut blacklist = Blacklist::new(Path::new("/work/proj"));
        blacklist.insert(Path::new("build"));

        assert!(blacklist.contains(Path::new("/work/proj/build/out.o")));
        assert!(blacklist.contains(Path::new("build/out.o")));
        assert!(!blacklist.contains(Path::new("src/main.c")));
    }

    #[test]
    fn test_root_blacklists_everything() {
        let mut blacklist = Blacklist::new(Path::new("/work"));
        blacklist.insert(Path::new("/"));
        assert!(blacklist.contains(Path::new("/usr/lib/libc.so.6")));
    }

    #[test]
    fn test_defaults_are_optional() -> Result<()> {
        let dir = TempDir::new()?;

        let with_defaults = Blacklist::load(dir.path(), true)?;
        assert!(with_defaults.contains(Path::new("/proc/meminfo")));
        assert!(with_defaults.contains(Path::new("/proc/self/maps")));

        let without = Blacklist::load(dir.path(), false)?;
        assert!(without.is_empty());
        assert!(!without.contains(Path::new("/proc/meminfo")));
        Ok(())
    }

    #[test]
    fn test_ignore_file_is_read() -> Result<()> {
        let dir = TempDir::new()?;
        fs::write(
            dir.path().join(BLACKLIST_FILE_NAME),
            "# machine specific\n/etc/hostname\n\nvendor\n",
        )?;

        let blacklist = Blacklist::load(dir.path(), false)?;
        assert_eq!(blacklist.len(), 2);
        assert!(blacklist.contains(Path::new("/etc/hostname")));
        assert!(blacklist.contains(&dir.path().join("vendor/lib.a")));
        Ok(())
    }
}
