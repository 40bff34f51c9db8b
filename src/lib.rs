#![allow(clippy::indexing_slicing)] // Bounds checked by logic

//! # depsnap - Build Dependency Snapshots
//!
//! depsnap runs a build under the platform's system-call tracer, works out
//! which files the build actually read, and records them in a manifest of
//! content digests. The files are uploaded to a backing store so the same
//! workspace can later be checked and repaired on another machine.
//!
//! ## Architecture
//!
//! - [`tracer`]: Runs the build under strace or Process Monitor
//! - [`trace`]: Parses the tracer's log into [`trace::TraceEvent`]s
//! - [`extract`]: Turns events into dependencies, links and variables
//! - [`manifest`]: The versioned, serializable record of a capture
//! - [`store`]: Content-addressed backing stores
//! - [`reconcile`]: Verifies and restores a workspace from a manifest
//! - [`config`]: User configuration parsing and validation
//! - [`commands`]: Command implementations for the CLI
//!
//! ## Example Usage
//!
//! ```no_run
//! use depsnap::DepsnapContext;
//! use depsnap::manifest::Manifest;
//! use depsnap::reconcile::{ReconcileOptions, check_config};
//!
//! # fn main() -> anyhow::Result<()> {
//! let ctx = DepsnapContext::new()?;
//! let store = depsnap::store::from_config(&ctx.config.store)?;
//! let manifest = Manifest::load(&ctx.config.manifest.file)?;
//!
//! let options = ReconcileOptions {
//!     cwd: std::env::current_dir()?,
//!     launch: false,
//! };
//! let report = check_config(&manifest, store.as_ref(), &options)?;
//! println!("{} files verified", report.verified);
//! # Ok(())
//! # }
//! ```

/// Ignore lists for paths that are never captured.
pub mod blacklist;

/// Command-line interface definitions (argument parsing structures).
pub mod cli;

/// Commands module containing all CLI command implementations.
pub mod commands;

/// Configuration parsing, validation, and management.
pub mod config;

/// Fatal error kinds and their exit codes.
pub mod error;

/// Dependency extraction from trace events.
pub mod extract;

/// Capture manifests and uploading their files.
pub mod manifest;

/// Workspace verification and repair.
pub mod reconcile;

/// Backing stores for captured files.
pub mod store;

/// Trace log parsing.
pub mod trace;

/// Running builds under a system-call tracer.
pub mod tracer;

/// Utility functions and helpers.
pub mod utils;

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Current version of the depsnap binary.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration file path relative to home directory.
pub const DEFAULT_CONFIG_PATH: &str = ".config/depsnap/config.toml";

/// Environment variable that overrides the configuration file location.
pub const CONFIG_PATH_ENV: &str = "DEPSNAP_CONFIG_PATH";

/// Manifest file name used when the configuration does not name one.
pub const DEFAULT_MANIFEST_FILE: &str = "build.depsnap";

/// Configuration shared by every command.
#[derive(Debug, Clone)]
pub struct DepsnapContext {
    /// Path to the configuration file.
    pub config_path: PathBuf,

    /// Loaded configuration settings.
    pub config: config::Config,
}

impl DepsnapContext {
    /// Creates a context from `$DEPSNAP_CONFIG_PATH` or the default location,
    /// writing a default configuration if none exists yet.
    ///
    /// # Errors
    /// Returns an error if the home directory cannot be determined or if the
    /// configuration file cannot be read or created.
    pub fn new() -> Result<Self> {
        let config_path = if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            PathBuf::from(path)
        } else {
            let home = dirs::home_dir().context("Could not find home directory")?;
            home.join(DEFAULT_CONFIG_PATH)
        };

        Self::with_config_path(config_path)
    }

    /// Creates a context from an explicit configuration file.
    ///
    /// # Errors
    /// Returns an error if the configuration cannot be loaded or created.
    pub fn with_config_path(config_path: PathBuf) -> Result<Self> {
        let config = config::Config::load(&config_path)?;

        let validator = config::validator::ConfigValidator::new();
        if let Err(e) = validator.validate_config_file(&config_path) {
            tracing::warn!(error = %e, "configuration validation failed");
        }

        Ok(Self {
            config_path,
            config,
        })
    }

    /// Persists the current configuration.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save_config(&self) -> Result<()> {
        self.config.save(&self.config_path)
    }
}
