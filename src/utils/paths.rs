use anyhow::{Context, Result};
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Lexically normalizes a path: drops `.` segments and folds `..` into the
/// preceding segment. Symlinks are not consulted.
///
/// A `..` directly under the root is discarded; leading `..` segments of a
/// relative path are kept. An empty result becomes `.`.
#[must_use]
pub fn normalize(path: &Path) -> PathBuf {
    let mut parts: Vec<Component<'_>> = Vec::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        return PathBuf::from(".");
    }
    parts.iter().collect()
}

/// Resolves `path` against `base` (if relative) and normalizes the result.
#[must_use]
pub fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize(path)
    } else {
        normalize(&base.join(path))
    }
}

/// Splits an absolute path into its root part (prefix + root dir) and its
/// named segments.
fn split_root(path: &Path) -> (Vec<Component<'_>>, Vec<Component<'_>>) {
    path.components()
        .partition(|c| matches!(c, Component::Prefix(_) | Component::RootDir))
}

/// True when both paths, once absolutized against `base`, live under the same
/// root and agree on at least `min_prefix` leading named segments.
#[must_use]
pub fn shares_prefix(a: &Path, b: &Path, base: &Path, min_prefix: usize) -> bool {
    let a = absolutize(a, base);
    let b = absolutize(b, base);
    let (root_a, names_a) = split_root(&a);
    let (root_b, names_b) = split_root(&b);

    if root_a != root_b || names_a.len().min(names_b.len()) < min_prefix {
        return false;
    }

    let shared = names_a
        .iter()
        .zip(&names_b)
        .take_while(|(x, y)| x == y)
        .count();
    shared >= min_prefix
}

/// Expresses `path` relative to `base`, climbing with `..` where needed.
///
/// Both are absolutized against `base` first. Returns `None` when they do not
/// share a root (different drives, for instance).
#[must_use]
pub fn relative_to(path: &Path, base: &Path) -> Option<PathBuf> {
    let path = absolutize(path, base);
    let base = normalize(base);
    let (root_p, names_p) = split_root(&path);
    let (root_b, names_b) = split_root(&base);

    if root_p != root_b {
        return None;
    }

    let shared = names_p
        .iter()
        .zip(&names_b)
        .take_while(|(x, y)| x == y)
        .count();

    let mut relative = PathBuf::new();
    for _ in shared..names_b.len() {
        relative.push("..");
    }
    for name in &names_p[shared..] {
        relative.push(name.as_os_str());
    }

    if relative.as_os_str().is_empty() {
        relative.push(".");
    }
    Some(relative)
}

/// Checks if a path is within a base directory, comparing canonical forms
/// component by component. Paths that cannot be canonicalized (already
/// deleted, for instance) fall back to their lexical form.
#[must_use]
pub fn is_within_directory(path: &Path, base: &Path) -> bool {
    let lexical_base = normalize(base);
    let canonical_base = base.canonicalize().unwrap_or_else(|_| lexical_base.clone());
    let absolute = absolutize(path, &lexical_base);
    let canonical = absolute.canonicalize().unwrap_or(absolute);
    canonical.starts_with(&canonical_base)
}

/// Ensures parent directories exist for a given path
///
/// # Errors
///
/// Returns an error if the parent directories cannot be created
pub fn ensure_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        fs::create_dir_all(parent).with_context(|| {
            format!("Failed to create parent directories for {}", path.display())
        })?;
    }
    Ok(())
}

/// Expands a leading `~` to the user's home directory
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined
pub fn expand_tilde(path: &Path) -> Result<PathBuf> {
    if let Some(path_str) = path.to_str() {
        if path_str.starts_with("~/") || path_str == "~" {
            let home = dirs::home_dir().context("Could not find home directory")?;
            if path_str == "~" {
                Ok(home)
            } else {
                Ok(home.join(&path_str[2..]))
            }
        } else {
            Ok(path.to_path_buf())
        }
    } else {
        Ok(path.to_path_buf())
    }
}
