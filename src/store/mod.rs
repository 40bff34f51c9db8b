//! Content-addressed blob stores that captured dependencies are pushed to
//! and pulled from.
//!
//! The core only ever asks a store for two things, so the trait stays
//! infallible at the call site: a store logs its own failure details and
//! answers with a plain `bool`.

pub mod local;

use crate::config::StoreConfig;
use crate::error::DepsnapError;
use crate::utils::paths::expand_tilde;
use anyhow::Result;
use std::path::Path;

pub use local::LocalStore;

/// Store types that `store.type` may name.
pub const SUPPORTED_STORE_TYPES: &[&str] = &["local"];

pub trait BackingStore: Send + Sync {
    /// Materializes the blob stored under `key` at `destination`.
    fn fetch(&self, key: &str, destination: &Path) -> bool;

    /// Uploads the file at `source` under `key`. Storing a key that already
    /// exists succeeds without rewriting it.
    fn store(&self, key: &str, source: &Path) -> bool;

    /// Human readable identifier, used in log lines.
    fn name(&self) -> &str;
}

/// Opens the store described by the user configuration.
///
/// # Errors
///
/// Returns [`DepsnapError::UnsupportedStore`] for an unknown `type`, or an
/// error if the store location cannot be resolved.
pub fn from_config(config: &StoreConfig) -> Result<Box<dyn BackingStore>> {
    match config.store_type.as_str() {
        "local" => {
            let root = expand_tilde(&config.path)?;
            tracing::debug!(root = %root.display(), "opening local store");
            Ok(Box::new(LocalStore::new(root, config.compression_level)))
        }
        other => Err(DepsnapError::UnsupportedStore(other.to_string()).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_from_config_local() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = StoreConfig {
            store_type: "local".into(),
            path: dir.path().to_path_buf(),
            compression_level: 3,
        };
        let store = from_config(&config)?;
        assert!(store.name().starts_with("local:"));
        Ok(())
    }

    #[test]
    fn test_from_config_unknown_type() {
        let config = StoreConfig {
            store_type: "gcs".into(),
            path: PathBuf::from("/tmp"),
            compression_level: 3,
        };
        let err = from_config(&config).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<DepsnapError>(),
            Some(DepsnapError::UnsupportedStore(kind)) if kind == "gcs"
        ));
    }
}
