//! The persisted record of a traced build: which files it read, which links
//! it followed and which environment variables point at them.

use crate::error::DepsnapError;
use crate::store::BackingStore;
use crate::utils::paths::absolutize;
use crate::utils::serialization::{decode_compressed, encode_compressed};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

/// A captured file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEntry {
    pub display_name: Option<String>,
    /// Lowercase hex SHA-256 of the content at capture time
    pub digest: String,
    /// Absolute, or relative to the working directory of the build
    pub path: PathBuf,
    pub is_relative: bool,
}

/// A symbolic link the build resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkEntry {
    pub link: PathBuf,
    pub target: PathBuf,
}

/// An environment variable whose value points at a dependency.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
    /// The variable is a search path; the value is prepended rather than
    /// replacing what the launching environment already has.
    pub append_with_separator: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Must stay the first field: readers decode it alone before the rest.
    pub version: u32,
    pub project_name: Option<String>,
    /// Build command line, as typed
    pub command: Option<String>,
    pub created_at: DateTime<Utc>,
    entries: Vec<DependencyEntry>,
    links: Vec<LinkEntry>,
    vars: BTreeSet<EnvVar>,
}

impl Manifest {
    /// Schema version written by this build.
    pub const VERSION: u32 = 1;

    #[must_use]
    pub fn new(project_name: Option<String>, command: Option<String>) -> Self {
        Self {
            version: Self::VERSION,
            project_name,
            command,
            created_at: Utc::now(),
            entries: Vec::new(),
            links: Vec::new(),
            vars: BTreeSet::new(),
        }
    }

    /// Appends an entry. Callers are responsible for path uniqueness.
    pub fn add_entry(&mut self, entry: DependencyEntry) {
        self.entries.push(entry);
    }

    pub fn add_link(&mut self, link: LinkEntry) {
        self.links.push(link);
    }

    /// Returns false if an identical variable was already recorded.
    pub fn add_var(&mut self, var: EnvVar) -> bool {
        self.vars.insert(var)
    }

    #[must_use]
    pub fn entries(&self) -> &[DependencyEntry] {
        &self.entries
    }

    #[must_use]
    pub fn links(&self) -> &[LinkEntry] {
        &self.links
    }

    pub fn vars(&self) -> impl Iterator<Item = &EnvVar> {
        self.vars.iter()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.links.is_empty() && self.vars.is_empty()
    }

    /// Reads a manifest, choosing the format from the file extension.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or decoded, or
    /// [`DepsnapError::ManifestVersion`] if it was written by a newer schema.
    pub fn load(path: &Path) -> Result<Self> {
        let span = tracing::span!(tracing::Level::DEBUG, "manifest_load", path = %path.display());
        let _guard = span.enter();

        let bytes =
            fs::read(path).with_context(|| format!("Failed to read manifest {}", path.display()))?;

        let manifest: Self = if is_text_format(path) {
            let text = std::str::from_utf8(&bytes)
                .with_context(|| format!("Manifest {} is not UTF-8", path.display()))?;
            let table: toml::Table = toml::from_str(text)
                .with_context(|| format!("Failed to parse manifest {}", path.display()))?;
            let version = table
                .get("version")
                .and_then(toml::Value::as_integer)
                .context("Manifest has no version")?;
            check_version(u32::try_from(version).unwrap_or(u32::MAX))?;
            toml::from_str(text)
                .with_context(|| format!("Failed to parse manifest {}", path.display()))?
        } else {
            let version: u32 = decode_compressed(&bytes)
                .with_context(|| format!("Failed to decode manifest {}", path.display()))?;
            check_version(version)?;
            decode_compressed(&bytes)
                .with_context(|| format!("Failed to decode manifest {}", path.display()))?
        };

        tracing::debug!(
            entries = manifest.entries.len(),
            links = manifest.links.len(),
            vars = manifest.vars.len(),
            "loaded manifest"
        );
        Ok(manifest)
    }

    /// Writes the manifest, choosing the format from the file extension.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or writing fails.
    pub fn save(&self, path: &Path, compression_level: i32) -> Result<()> {
        let bytes = if is_text_format(path) {
            toml::to_string_pretty(self)
                .context("Failed to serialize manifest")?
                .into_bytes()
        } else {
            encode_compressed(self, compression_level).context("Failed to encode manifest")?
        };

        fs::write(path, bytes)
            .with_context(|| format!("Failed to write manifest {}", path.display()))?;
        tracing::debug!(path = %path.display(), "saved manifest");
        Ok(())
    }
}

fn check_version(found: u32) -> Result<()> {
    if found > Manifest::VERSION {
        return Err(DepsnapError::ManifestVersion {
            found,
            supported: Manifest::VERSION,
        }
        .into());
    }
    Ok(())
}

/// `.toml` manifests are written as text; everything else is binary.
#[must_use]
pub fn is_text_format(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"))
}

/// Result of pushing every entry to a backing store.
#[derive(Debug, Default)]
pub struct UploadReport {
    pub uploaded: usize,
    pub failed: Vec<DependencyEntry>,
}

impl UploadReport {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Sends each entry's file to `store` under its digest. Relative entries
/// resolve against `cwd`.
///
/// Entries are independent, so they are sent in parallel. A failed send is
/// a warning, never an error.
pub fn upload(manifest: &Manifest, store: &dyn BackingStore, cwd: &Path) -> UploadReport {
    let span = tracing::span!(tracing::Level::DEBUG, "upload", store = store.name());
    let _guard = span.enter();

    let failed: Vec<DependencyEntry> = manifest
        .entries()
        .par_iter()
        .filter(|entry| {
            let source = absolutize(&entry.path, cwd);
            let stored = store.store(&entry.digest, &source);
            if !stored {
                tracing::warn!(path = %entry.path.display(), "could not upload dependency");
            }
            !stored
        })
        .cloned()
        .collect();

    UploadReport {
        uploaded: manifest.entries().len() - failed.len(),
        failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn sample() -> Manifest {
        let mut manifest = Manifest::new(Some("demo".into()), Some("make -j4".into()));
        manifest.add_entry(DependencyEntry {
            display_name: None,
            digest: "aa".repeat(32),
            path: PathBuf::from("/usr/bin/cc"),
            is_relative: false,
        });
        manifest.add_entry(DependencyEntry {
            display_name: Some("x.so".into()),
            digest: "bb".repeat(32),
            path: PathBuf::from("../lib/x.so"),
            is_relative: true,
        });
        manifest.add_link(LinkEntry {
            link: PathBuf::from("/usr/bin/cc"),
            target: PathBuf::from("/usr/bin/gcc-13"),
        });
        manifest.add_var(EnvVar {
            name: "PATH".into(),
            value: "/usr/bin".into(),
            append_with_separator: true,
        });
        manifest
    }

    #[test]
    fn test_binary_round_trip() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("build.depsnap");
        let manifest = sample();

        manifest.save(&path, 3)?;
        assert_eq!(Manifest::load(&path)?, manifest);
        Ok(())
    }

    #[test]
    fn test_toml_round_trip() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("build.toml");
        let manifest = sample();

        manifest.save(&path, 3)?;
        let text = fs::read_to_string(&path)?;
        assert!(text.contains("project_name = \"demo\""));
        assert!(text.contains("[[entries]]"));
        assert_eq!(Manifest::load(&path)?, manifest);
        Ok(())
    }

    #[test]
    fn test_optional_fields_absent() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("bare.toml");
        let manifest = Manifest::new(None, None);

        manifest.save(&path, 3)?;
        let loaded = Manifest::load(&path)?;
        assert_eq!(loaded.project_name, None);
        assert_eq!(loaded.command, None);
        assert!(loaded.is_empty());
        Ok(())
    }

    #[test]
    fn test_newer_version_rejected() -> Result<()> {
        let dir = TempDir::new()?;
        let mut manifest = sample();
        manifest.version = Manifest::VERSION + 1;

        for name in ["future.toml", "future.depsnap"] {
            let path = dir.path().join(name);
            manifest.save(&path, 3)?;
            let err = Manifest::load(&path).unwrap_err();
            assert!(matches!(
                err.downcast_ref::<DepsnapError>(),
                Some(DepsnapError::ManifestVersion { found: 2, supported: 1 })
            ));
        }
        Ok(())
    }

    #[test]
    fn test_vars_are_a_set() {
        let mut manifest = Manifest::new(None, None);
        let var = EnvVar {
            name: "CC".into(),
            value: "/usr/bin/cc".into(),
            append_with_separator: false,
        };
        assert!(manifest.add_var(var.clone()));
        assert!(!manifest.add_var(var));
        assert_eq!(manifest.vars().count(), 1);
    }

    #[test]
    fn test_text_format_detection() {
        assert!(is_text_format(Path::new("deps.toml")));
        assert!(is_text_format(Path::new("deps.TOML")));
        assert!(!is_text_format(Path::new("build.depsnap")));
        assert!(!is_text_format(Path::new("toml")));
    }

    struct RecordingStore {
        refuse: String,
        stored: Mutex<HashMap<String, PathBuf>>,
    }

    impl BackingStore for RecordingStore {
        fn fetch(&self, _key: &str, _destination: &Path) -> bool {
            false
        }

        fn store(&self, key: &str, source: &Path) -> bool {
            if key == self.refuse {
                return false;
            }
            self.stored
                .lock()
                .unwrap()
                .insert(key.to_string(), source.to_path_buf());
            true
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    #[test]
    fn test_upload_reports_failures() {
        let manifest = sample();
        let refused = "bb".repeat(32);
        let store = RecordingStore {
            refuse: refused.clone(),
            stored: Mutex::new(HashMap::new()),
        };

        let report = upload(&manifest, &store, Path::new("/work/proj"));
        assert_eq!(report.uploaded, 1);
        assert!(!report.is_complete());
        assert_eq!(report.failed[0].digest, refused);

        let stored = store.stored.lock().unwrap();
        assert_eq!(stored.get(&"aa".repeat(32)), Some(&PathBuf::from("/usr/bin/cc")));
    }

    #[test]
    fn test_upload_resolves_relative_paths() {
        let mut manifest = Manifest::new(None, None);
        manifest.add_entry(DependencyEntry {
            display_name: None,
            digest: "cc".into(),
            path: PathBuf::from("../lib/x.so"),
            is_relative: true,
        });
        let store = RecordingStore {
            refuse: String::new(),
            stored: Mutex::new(HashMap::new()),
        };

        let report = upload(&manifest, &store, Path::new("/work/proj"));
        assert!(report.is_complete());
        let stored = store.stored.lock().unwrap();
        assert_eq!(stored.get("cc"), Some(&PathBuf::from("/work/lib/x.so")));
    }
}
