use crate::DepsnapContext;
use crate::commands::{manifest_path, print_manifest};
use crate::manifest::Manifest;
use anyhow::{Context, Result};
use std::path::Path;

/// Print the manifest at `file`, or the configured one.
///
/// # Errors
///
/// Returns an error if the manifest cannot be read or decoded.
pub fn execute(ctx: &DepsnapContext, file: Option<&Path>) -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to determine working directory")?;
    let path = manifest_path(ctx, file, &cwd);
    let manifest = Manifest::load(&path)?;
    print_manifest(&manifest);
    Ok(())
}
