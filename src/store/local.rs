//! Store backed by a directory on the local filesystem (or a network mount).
//!
//! Layout: `<root>/objects/<key>.zst`, each object zstd compressed. An
//! object keeps the permission bits of the file it was stored from, and a
//! fetch hands them on to the restored file.

use super::BackingStore;
use crate::utils::permissions::FilePermissions;
use anyhow::{Context, Result, bail};
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
    compression_level: i32,
    name: String,
}

impl LocalStore {
    #[must_use]
    pub fn new(root: PathBuf, compression_level: i32) -> Self {
        let name = format!("local:{}", root.display());
        Self {
            root,
            compression_level,
            name,
        }
    }

    fn objects_dir(&self) -> PathBuf {
        self.root.join("objects")
    }

    /// Location of the object for `key`.
    ///
    /// # Errors
    ///
    /// Keys are single path segments; anything that could escape the objects
    /// directory is refused.
    pub fn object_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.contains(['/', '\\']) || key.contains("..") {
            bail!("Invalid store key '{key}'");
        }
        Ok(self.objects_dir().join(format!("{key}.zst")))
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.object_path(key).is_ok_and(|path| path.is_file())
    }

    fn try_store(&self, key: &str, source: &Path) -> Result<()> {
        let object = self.object_path(key)?;
        if object.exists() {
            tracing::debug!(key, "object already stored");
            return Ok(());
        }

        let objects_dir = self.objects_dir();
        fs::create_dir_all(&objects_dir)
            .with_context(|| format!("Failed to create {}", objects_dir.display()))?;

        let input = File::open(source)
            .with_context(|| format!("Failed to open {}", source.display()))?;
        // written beside the final object so the rename cannot cross devices
        let mut staged = NamedTempFile::new_in(&objects_dir)
            .context("Failed to create temporary object")?;
        zstd::stream::copy_encode(BufReader::new(input), &mut staged, self.compression_level)
            .with_context(|| format!("Failed to compress {}", source.display()))?;
        staged
            .persist(&object)
            .with_context(|| format!("Failed to write object {}", object.display()))?;
        FilePermissions::from_path(source)?.apply_to_path(&object)?;
        Ok(())
    }

    fn try_fetch(&self, key: &str, destination: &Path) -> Result<()> {
        let object = self.object_path(key)?;
        let input =
            File::open(&object).with_context(|| format!("No object for key '{key}'"))?;

        let parent = match destination.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut staged =
            NamedTempFile::new_in(parent).context("Failed to create temporary file")?;
        zstd::stream::copy_decode(BufReader::new(input), &mut staged)
            .with_context(|| format!("Failed to decompress object {}", object.display()))?;
        let permissions = FilePermissions::from_path(&object).unwrap_or_default();
        staged
            .persist(destination)
            .with_context(|| format!("Failed to write {}", destination.display()))?;
        permissions.apply_to_path(destination)?;
        Ok(())
    }
}

impl BackingStore for LocalStore {
    fn fetch(&self, key: &str, destination: &Path) -> bool {
        match self.try_fetch(key, destination) {
            Ok(()) => {
                tracing::debug!(key, path = %destination.display(), "fetched");
                true
            }
            Err(e) => {
                tracing::warn!(store = %self.name, key, error = %format!("{e:#}"), "fetch failed");
                false
            }
        }
    }

    fn store(&self, key: &str, source: &Path) -> bool {
        match self.try_store(key, source) {
            Ok(()) => {
                tracing::debug!(key, path = %source.display(), "stored");
                true
            }
            Err(e) => {
                tracing::warn!(store = %self.name, key, error = %format!("{e:#}"), "store failed");
                false
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
