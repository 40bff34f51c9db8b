//! Command-line interface definitions for depsnap.
//!
//! The CLI definitions are shared between the main binary and build tools
//! (like xtask) for man page generation.

use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

/// Main CLI structure for depsnap.
#[derive(Parser)]
#[command(
    name = "depsnap",
    version = crate::VERSION,
    about = "Capture and restore the files a build depends on",
    long_about = "Runs a build under a system-call tracer, records every file it read in a \
                  manifest of content digests, and restores that workspace from a backing store"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Show debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Log level; `RUST_LOG` takes precedence
    #[arg(long, global = true, value_enum)]
    pub log_level: Option<LogLevel>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

impl Cli {
    /// The filter directive implied by the verbosity flags.
    #[must_use]
    pub fn log_directive(&self) -> &'static str {
        if let Some(level) = self.log_level {
            level.as_str()
        } else if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            "warn"
        }
    }
}

/// All available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Trace a build and capture the files it depends on
    Trace {
        /// Project name stored in the manifest
        #[arg(short, long)]
        name: Option<String>,

        /// Manifest to write (defaults to `manifest.file` from the config)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Also capture files under the working directory
        #[arg(long)]
        include_project_dir: bool,

        /// Do not ignore the built-in system directories
        #[arg(long)]
        no_default_blacklist: bool,

        /// Do not trace child processes
        #[arg(long)]
        no_follow: bool,

        /// Record every system call, not only file accesses
        #[arg(long)]
        no_filter: bool,

        /// Kill the build after this long, e.g. `30m`
        #[arg(long)]
        timeout: Option<String>,

        /// Additional paths to ignore
        #[arg(long, value_name = "PATH")]
        ignore: Vec<PathBuf>,

        /// Write the manifest without uploading dependencies
        #[arg(long)]
        no_upload: bool,

        /// Also upload the manifest itself under its file name
        #[arg(long)]
        save_manifest: bool,

        /// Build command to trace
        #[arg(last = true, required = true, num_args = 1..)]
        command: Vec<String>,
    },

    /// Verify the workspace against a manifest and fetch what is missing
    Check {
        /// Manifest to read (defaults to `manifest.file` from the config)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Relaunch the recorded build with the recorded environment
        #[arg(long)]
        launch: bool,

        /// Print the manifest before checking
        #[arg(long)]
        dump: bool,
    },

    /// Print the contents of a manifest
    Show {
        /// Manifest to read (defaults to `manifest.file` from the config)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Get and set configuration options
    Config {
        /// Configuration key (e.g., store.path, trace.timeout)
        key: Option<String>,

        /// Value to set (if not provided, shows current value)
        value: Option<String>,

        /// Remove the configuration key
        #[arg(long, conflicts_with = "value")]
        unset: bool,

        /// List all configuration values
        #[arg(short, long)]
        list: bool,
    },

    /// Generate shell completion scripts
    Completion {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}
