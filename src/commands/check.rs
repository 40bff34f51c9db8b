use crate::DepsnapContext;
use crate::commands::{manifest_path, print_info, print_manifest, print_success, print_warning};
use crate::manifest::Manifest;
use crate::reconcile::{ReconcileOptions, ReconcileReport, check_config};
use crate::store;
use anyhow::{Context, Result};
use colored::Colorize;
use std::path::Path;

/// Verify the workspace against a manifest, fetching missing files.
///
/// # Errors
///
/// Returns an error if:
/// - The manifest cannot be read
/// - The store is misconfigured
/// - A missing dependency cannot be fetched
/// - The relaunch fails
pub fn execute(ctx: &DepsnapContext, file: Option<&Path>, launch: bool, dump: bool) -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to determine working directory")?;
    let path = manifest_path(ctx, file, &cwd);
    let manifest = Manifest::load(&path)?;

    if dump {
        print_manifest(&manifest);
        println!();
    }

    let store = store::from_config(&ctx.config.store)?;
    print_info(&format!(
        "Checking {} files against {}",
        manifest.entries().len(),
        store.name()
    ));

    let options = ReconcileOptions { cwd, launch };
    let report = check_config(&manifest, store.as_ref(), &options)?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &ReconcileReport) {
    for path in &report.fetched {
        println!("  {} {}", "fetched".green(), path.display());
    }
    for mismatch in &report.mismatches {
        print_warning(&format!(
            "{} differs (expected {}, found {})",
            mismatch.path.display(),
            mismatch.expected,
            mismatch.actual
        ));
    }
    for failure in &report.link_failures {
        print_warning(&format!(
            "Could not link {} -> {}: {}",
            failure.link.display(),
            failure.target.display(),
            failure.reason
        ));
    }

    let summary = format!(
        "{} verified, {} fetched, {} links created",
        report.verified,
        report.fetched.len(),
        report.links_created
    );
    if report.is_clean() {
        print_success(&summary);
    } else {
        print_warning(&summary);
    }

    if let Some(pid) = report.launched {
        print_info(&format!("Launched build (pid {pid})"));
    }
}
