use crate::DepsnapContext;
use crate::commands::{print_success, print_warning};
use anyhow::Result;
use colored::Colorize;

/// Execute config command to get/set configuration values
///
/// # Errors
///
/// Returns an error if:
/// - Failed to set or unset configuration value
/// - Failed to save configuration
pub fn execute(
    ctx: &mut DepsnapContext,
    key: Option<&str>,
    value: Option<String>,
    unset: bool,
    list: bool,
) -> Result<()> {
    // If --list flag is set or no key is provided, show all configuration
    let Some(key) = key.filter(|_| !list) else {
        show_all_config(ctx);
        return Ok(());
    };

    if unset {
        ctx.config.unset(key)?;
        ctx.save_config()?;
        print_success(&format!("Unset {key}"));
    } else if let Some(val) = value {
        ctx.config.set(key, val.clone())?;
        ctx.save_config()?;
        print_success(&format!("Set {key} = {val}"));
    } else if let Some(val) = ctx.config.get(key) {
        println!("{val}");
    } else {
        print_warning(&format!("Configuration key '{key}' is not set"));
    }

    Ok(())
}

/// Show all configuration values
fn show_all_config(ctx: &DepsnapContext) {
    let config = &ctx.config;

    println!("{}", "[store]".bold());
    println!("  type = {}", config.store.store_type);
    println!("  path = {}", config.store.path.display());
    println!("  compression_level = {}", config.store.compression_level);

    println!("\n{}", "[trace]".bold());
    println!("  follow_subprocesses = {}", config.trace.follow_subprocesses);
    println!("  filter_calls = {}", config.trace.filter_calls);
    println!("  default_blacklist = {}", config.trace.default_blacklist);
    println!("  include_project_dir = {}", config.trace.include_project_dir);
    if let Some(timeout) = &config.trace.timeout {
        println!("  timeout = {timeout}");
    }
    if let Some(tracer) = &config.trace.tracer_path {
        println!("  tracer_path = {}", tracer.display());
    }

    println!("\n{}", "[manifest]".bold());
    println!("  file = {}", config.manifest.file.display());
}
