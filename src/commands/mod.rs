pub mod check;
pub mod config;
pub mod show;
pub mod trace;

use crate::DepsnapContext;
use crate::manifest::Manifest;
use colored::Colorize;
use std::path::{Path, PathBuf};

pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// The manifest a command works on: the one given on the command line, or
/// the configured default, resolved against `cwd`.
#[must_use]
pub fn manifest_path(ctx: &DepsnapContext, file: Option<&Path>, cwd: &Path) -> PathBuf {
    let file = file.unwrap_or(&ctx.config.manifest.file);
    cwd.join(file)
}

/// Prints every section of a manifest.
pub fn print_manifest(manifest: &Manifest) {
    println!("{}", "[manifest]".bold());
    println!("  version = {}", manifest.version);
    if let Some(name) = &manifest.project_name {
        println!("  project = {name}");
    }
    if let Some(command) = &manifest.command {
        println!("  command = {command}");
    }
    println!(
        "  created = {}",
        manifest.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );

    println!(
        "\n{} ({})",
        "[dependencies]".bold(),
        manifest.entries().len()
    );
    for entry in manifest.entries() {
        let digest = entry.digest.get(..12).unwrap_or(&entry.digest);
        let marker = if entry.is_relative { "rel" } else { "abs" };
        match &entry.display_name {
            Some(name) => println!(
                "  {} {marker} {} ({name})",
                digest.yellow(),
                entry.path.display()
            ),
            None => println!("  {} {marker} {}", digest.yellow(), entry.path.display()),
        }
    }

    if !manifest.links().is_empty() {
        println!("\n{} ({})", "[links]".bold(), manifest.links().len());
        for link in manifest.links() {
            println!("  {} -> {}", link.link.display(), link.target.display());
        }
    }

    let vars: Vec<_> = manifest.vars().collect();
    if !vars.is_empty() {
        println!("\n{} ({})", "[variables]".bold(), vars.len());
        for var in vars {
            let op = if var.append_with_separator { "+=" } else { "=" };
            println!("  {} {op} {}", var.name.cyan(), var.value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_manifest_path_prefers_argument() {
        let ctx = DepsnapContext {
            config_path: PathBuf::from("/nonexistent/config.toml"),
            config: Config::default(),
        };
        let cwd = Path::new("/work");

        assert_eq!(
            manifest_path(&ctx, None, cwd),
            PathBuf::from("/work").join(crate::DEFAULT_MANIFEST_FILE)
        );
        assert_eq!(
            manifest_path(&ctx, Some(Path::new("out/deps.toml")), cwd),
            PathBuf::from("/work/out/deps.toml")
        );
        assert_eq!(
            manifest_path(&ctx, Some(Path::new("/abs/deps")), cwd),
            PathBuf::from("/abs/deps")
        );
    }
}
