use std::fmt;
use std::path::PathBuf;

/// Failures that abort a whole trace or reconciliation.
///
/// Everything else travels as a plain `anyhow::Error`; these kinds exist so
/// the CLI can tell them apart (via `downcast_ref`) and pick an exit code.
#[derive(Debug)]
pub enum DepsnapError {
    /// Tracer was configured with an unusable log file name or an empty command
    InvalidTracerArguments(String),
    /// The platform tracing utility could not be located
    TracerUnavailable(String),
    /// Spawning or waiting on the traced process failed
    Trace(String),
    /// The traced process outlived the configured timeout
    TraceTimeout(std::time::Duration),
    /// A recorded dependency is missing locally and the store could not supply it
    MissingDependency {
        /// Content digest that was requested from the store
        digest: String,
        /// Location the file was supposed to be materialized at
        path: PathBuf,
    },
    /// The configured backing store type is not known
    UnsupportedStore(String),
    /// A manifest was written by a newer, incompatible version
    ManifestVersion {
        /// Version found in the file
        found: u32,
        /// Highest version this build understands
        supported: u32,
    },
}

impl DepsnapError {
    /// Process exit code the CLI uses for this failure
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidTracerArguments(_)
            | Self::TracerUnavailable(_)
            | Self::Trace(_)
            | Self::TraceTimeout(_) => 2,
            Self::MissingDependency { .. } => 3,
            Self::UnsupportedStore(_) | Self::ManifestVersion { .. } => 1,
        }
    }

    /// Short description of the error kind
    #[must_use]
    pub const fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidTracerArguments(_) => "Invalid Tracer Arguments",
            Self::TracerUnavailable(_) => "Tracer Unavailable",
            Self::Trace(_) => "Trace Failed",
            Self::TraceTimeout(_) => "Trace Timed Out",
            Self::MissingDependency { .. } => "Missing Dependency",
            Self::UnsupportedStore(_) => "Unsupported Store",
            Self::ManifestVersion { .. } => "Unsupported Manifest Version",
        }
    }
}

impl fmt::Display for DepsnapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTracerArguments(msg) | Self::Trace(msg) => {
                write!(f, "{}: {msg}", self.error_type())
            }
            Self::TracerUnavailable(program) => write!(
                f,
                "{}: could not find '{program}' on PATH\n\nSuggestions:\n\
                 - Install it with your package manager\n\
                 - Or point trace.tracer_path at it (depsnap config trace.tracer_path <path>)",
                self.error_type()
            ),
            Self::TraceTimeout(limit) => write!(
                f,
                "{}: build still running after {}; the process group was killed",
                self.error_type(),
                humantime::format_duration(*limit)
            ),
            Self::MissingDependency { digest, path } => write!(
                f,
                "{}: {} is absent and the backing store has no object {digest}",
                self.error_type(),
                path.display()
            ),
            Self::UnsupportedStore(kind) => write!(
                f,
                "{}: '{kind}'. Supported types: {}",
                self.error_type(),
                crate::store::SUPPORTED_STORE_TYPES.join(", ")
            ),
            Self::ManifestVersion { found, supported } => write!(
                f,
                "{}: manifest version {found}, this build reads up to {supported}",
                self.error_type()
            ),
        }
    }
}

impl std::error::Error for DepsnapError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_by_kind() {
        assert_eq!(DepsnapError::Trace("spawn".into()).exit_code(), 2);
        assert_eq!(
            DepsnapError::TraceTimeout(std::time::Duration::from_secs(1)).exit_code(),
            2
        );
        let missing = DepsnapError::MissingDependency {
            digest: "abc".into(),
            path: PathBuf::from("lib/x.so"),
        };
        assert_eq!(missing.exit_code(), 3);
        assert!(missing.to_string().contains("abc"));
    }

    #[test]
    fn test_downcast_through_anyhow() {
        let err: anyhow::Error = DepsnapError::UnsupportedStore("s3".into()).into();
        let kind = err.downcast_ref::<DepsnapError>();
        assert!(matches!(kind, Some(DepsnapError::UnsupportedStore(_))));
        assert!(err.to_string().contains("local"));
    }
}
