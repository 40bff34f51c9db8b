use super::Config;
use crate::error::DepsnapError;
use crate::store::SUPPORTED_STORE_TYPES;
use anyhow::{Context, Result};
use std::path::Path;

/// Reads and validates a configuration file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, is not UTF-8, is not valid
/// TOML, or holds out-of-range values.
pub fn parse_config_file(path: &Path) -> Result<Config> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let content = simdutf8::basic::from_utf8(&bytes)
        .map_err(|e| anyhow::anyhow!("Invalid UTF-8 in config file: {e}"))?;
    parse_config_str(content)
}

fn parse_config_str(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse TOML config")?;

    // Validate and return validation errors directly without wrapping
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &Config) -> Result<()> {
    if !(1..=22).contains(&config.store.compression_level) {
        anyhow::bail!("Compression level must be between 1 and 22");
    }

    if !SUPPORTED_STORE_TYPES.contains(&config.store.store_type.as_str()) {
        return Err(DepsnapError::UnsupportedStore(config.store.store_type.clone()).into());
    }

    config.trace.timeout_duration()?;

    if config.manifest.file.as_os_str().is_empty() {
        anyhow::bail!("Manifest file name cannot be empty");
    }

    Ok(())
}
