pub mod parser;
pub mod validator;

use crate::store::SUPPORTED_STORE_TYPES;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub trace: TraceConfig,

    #[serde(default)]
    pub manifest: ManifestConfig,
}

/// Where captured dependencies are uploaded to and fetched from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreConfig {
    #[serde(rename = "type", default = "default_store_type")]
    pub store_type: String,
    /// Root of the store; `~` is expanded
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,
}

/// Defaults for `depsnap trace`; each has a command-line override.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TraceConfig {
    #[serde(default = "default_true")]
    pub follow_subprocesses: bool,
    #[serde(default = "default_true")]
    pub filter_calls: bool,
    #[serde(default = "default_true")]
    pub default_blacklist: bool,
    #[serde(default)]
    pub include_project_dir: bool,
    /// Human readable limit such as `30m`; unset means no limit
    #[serde(default)]
    pub timeout: Option<String>,
    #[serde(default)]
    pub tracer_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestConfig {
    /// Manifest written by `trace` and read by `check`; `.toml` selects the
    /// text format
    #[serde(default = "default_manifest_file")]
    pub file: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            store_type: default_store_type(),
            path: default_store_path(),
            compression_level: default_compression_level(),
        }
    }
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            follow_subprocesses: true,
            filter_calls: true,
            default_blacklist: true,
            include_project_dir: false,
            timeout: None,
            tracer_path: None,
        }
    }
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            file: default_manifest_file(),
        }
    }
}

impl TraceConfig {
    /// The configured timeout, parsed.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a valid duration such as `90s`
    /// or `1h 30m`.
    pub fn timeout_duration(&self) -> Result<Option<Duration>> {
        self.timeout
            .as_deref()
            .map(|raw| {
                humantime::parse_duration(raw).with_context(|| format!("Invalid timeout: {raw}"))
            })
            .transpose()
    }
}

impl Config {
    /// Load configuration from a file
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Cannot create parent directories
    /// - Cannot read or parse the configuration file
    /// - Configuration file contains invalid TOML or out-of-range values
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            // Create default config if it doesn't exist
            let config = Self::default();
            config.save(path)?;
            return Ok(config);
        }

        parser::parse_config_file(path)
    }

    /// Save configuration to a file
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Cannot create parent directories
    /// - Cannot write to the file
    /// - TOML serialization fails
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let toml_str = toml::to_string_pretty(self)?;
        let mut file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create config file {}", path.display()))?;
        file.write_all(toml_str.as_bytes())?;
        Ok(())
    }

    /// Get a configuration value by key
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        let (section, field) = key.split_once('.')?;

        match (section, field) {
            ("store", "type") => Some(self.store.store_type.clone()),
            ("store", "path") => Some(self.store.path.display().to_string()),
            ("store", "compression_level") => Some(self.store.compression_level.to_string()),
            ("trace", "follow_subprocesses") => Some(self.trace.follow_subprocesses.to_string()),
            ("trace", "filter_calls") => Some(self.trace.filter_calls.to_string()),
            ("trace", "default_blacklist") => Some(self.trace.default_blacklist.to_string()),
            ("trace", "include_project_dir") => Some(self.trace.include_project_dir.to_string()),
            ("trace", "timeout") => self.trace.timeout.clone(),
            ("trace", "tracer_path") => self
                .trace
                .tracer_path
                .as_ref()
                .map(|p| p.display().to_string()),
            ("manifest", "file") => Some(self.manifest.file.display().to_string()),
            _ => None,
        }
    }

    /// Set a configuration value by key
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The key format is invalid (must be section.key)
    /// - The key is unknown
    /// - The value is invalid for the key (e.g., an unknown store type)
    pub fn set(&mut self, key: &str, value: String) -> Result<()> {
        let (section, field) = key
            .split_once('.')
            .ok_or_else(|| anyhow::anyhow!("Invalid configuration key: {key}"))?;

        match (section, field) {
            ("store", "type") => {
                if !SUPPORTED_STORE_TYPES.contains(&value.as_str()) {
                    return Err(anyhow::anyhow!(
                        "Unsupported store type: {value} (supported: {})",
                        SUPPORTED_STORE_TYPES.join(", ")
                    ));
                }
                self.store.store_type = value;
            }
            ("store", "path") => self.store.path = PathBuf::from(value),
            ("store", "compression_level") => {
                let level: i32 = value
                    .parse()
                    .with_context(|| format!("Invalid compression level: {value}"))?;
                if !(1..=22).contains(&level) {
                    return Err(anyhow::anyhow!(
                        "Compression level must be between 1 and 22"
                    ));
                }
                self.store.compression_level = level;
            }
            ("trace", "follow_subprocesses") => {
                self.trace.follow_subprocesses = parse_bool(&value)?;
            }
            ("trace", "filter_calls") => self.trace.filter_calls = parse_bool(&value)?,
            ("trace", "default_blacklist") => self.trace.default_blacklist = parse_bool(&value)?,
            ("trace", "include_project_dir") => {
                self.trace.include_project_dir = parse_bool(&value)?;
            }
            ("trace", "timeout") => {
                humantime::parse_duration(&value)
                    .with_context(|| format!("Invalid timeout: {value}"))?;
                self.trace.timeout = Some(value);
            }
            ("trace", "tracer_path") => self.trace.tracer_path = Some(PathBuf::from(value)),
            ("manifest", "file") => {
                if value.trim().is_empty() {
                    return Err(anyhow::anyhow!("Manifest file name cannot be empty"));
                }
                self.manifest.file = PathBuf::from(value);
            }
            _ => return Err(anyhow::anyhow!("Unknown configuration key: {key}")),
        }
        Ok(())
    }

    /// Unset a configuration value by key
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The key format is invalid (must be section.key)
    /// - The key is unknown or cannot be unset
    pub fn unset(&mut self, key: &str) -> Result<()> {
        let (section, field) = key
            .split_once('.')
            .ok_or_else(|| anyhow::anyhow!("Invalid configuration key: {key}"))?;

        match (section, field) {
            ("trace", "timeout") => self.trace.timeout = None,
            ("trace", "tracer_path") => self.trace.tracer_path = None,
            _ => return Err(anyhow::anyhow!("Cannot unset configuration key: {key}")),
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    value
        .parse()
        .with_context(|| format!("Invalid boolean: {value}"))
}

// Default functions for serde
fn default_store_type() -> String {
    "local".to_string()
}

fn default_store_path() -> PathBuf {
    PathBuf::from("~/.depsnap/store")
}

const fn default_compression_level() -> i32 {
    3
}

const fn default_true() -> bool {
    true
}

fn default_manifest_file() -> PathBuf {
    PathBuf::from(crate::DEFAULT_MANIFEST_FILE)
}
