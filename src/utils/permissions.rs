use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Permission bits carried from a captured file to its restored copy.
///
/// Only the `rwx` bits for user, group and other are kept; set-id and sticky
/// bits are not restored. Windows has just the read-only flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilePermissions {
    mode: u32,
}

impl FilePermissions {
    #[must_use]
    pub const fn from_mode(mode: u32) -> Self {
        Self { mode: mode & 0o777 }
    }

    #[must_use]
    pub const fn mode(&self) -> u32 {
        self.mode
    }

    /// Reads the permissions of the file at `path`, following links.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata cannot be read.
    pub fn from_path(path: &Path) -> Result<Self> {
        let metadata = fs::metadata(path)
            .with_context(|| format!("Failed to read metadata for: {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            Ok(Self::from_mode(metadata.permissions().mode()))
        }

        #[cfg(not(unix))]
        {
            let mode = if metadata.permissions().readonly() {
                0o444
            } else {
                0o644
            };
            Ok(Self::from_mode(mode))
        }
    }

    /// # Errors
    ///
    /// Returns an error if the permissions cannot be set.
    pub fn apply_to_path(&self, path: &Path) -> Result<()> {
        #[cfg(unix)]
        let permissions = {
            use std::os::unix::fs::PermissionsExt;
            fs::Permissions::from_mode(self.mode)
        };

        #[cfg(not(unix))]
        let permissions = {
            let mut permissions = fs::metadata(path)
                .with_context(|| format!("Failed to read metadata for: {}", path.display()))?
                .permissions();
            // no owner write bit means read-only
            permissions.set_readonly(self.mode & 0o200 == 0);
            permissions
        };

        fs::set_permissions(path, permissions)
            .with_context(|| format!("Failed to set permissions for: {}", path.display()))
    }

    /// `rw-r--r--`, for files whose origin is unknown.
    #[must_use]
    pub const fn default_file() -> Self {
        Self::from_mode(0o644)
    }

    #[must_use]
    pub const fn is_executable(&self) -> bool {
        self.mode & 0o111 != 0
    }
}

impl Default for FilePermissions {
    fn default() -> Self {
        Self::default_file()
    }
}
