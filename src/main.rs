use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::{Generator, generate};
use depsnap::cli::{Cli, Commands};
use depsnap::commands::trace::TraceOptions;
use depsnap::error::DepsnapError;
use depsnap::{DepsnapContext, commands};
use std::io;
use std::process;
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();
    init_logging(&cli);

    if let Err(e) = run(cli) {
        commands::print_error(&format!("{e:#}"));
        let code = e
            .downcast_ref::<DepsnapError>()
            .map_or(1, DepsnapError::exit_code);
        process::exit(code);
    }
}

fn init_logging(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_directive()));
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Completion { shell } => {
            print_completions(shell, &mut Cli::command());
        }
        Commands::Trace {
            name,
            file,
            include_project_dir,
            no_default_blacklist,
            no_follow,
            no_filter,
            timeout,
            ignore,
            no_upload,
            save_manifest,
            command,
        } => {
            let ctx = DepsnapContext::new()?;
            let options = TraceOptions {
                name,
                file,
                include_project_dir,
                no_default_blacklist,
                no_follow,
                no_filter,
                timeout,
                ignore,
                no_upload,
                save_manifest,
                command,
            };
            commands::trace::execute(&ctx, &options)?;
        }
        Commands::Check { file, launch, dump } => {
            let ctx = DepsnapContext::new()?;
            commands::check::execute(&ctx, file.as_deref(), launch, dump)?;
        }
        Commands::Show { file } => {
            let ctx = DepsnapContext::new()?;
            commands::show::execute(&ctx, file.as_deref())?;
        }
        Commands::Config {
            key,
            value,
            unset,
            list,
        } => {
            let mut ctx = DepsnapContext::new()?;
            commands::config::execute(&mut ctx, key.as_deref(), value, unset, list)?;
        }
    }

    Ok(())
}

fn print_completions<G: Generator>(g: G, cmd: &mut clap::Command) {
    generate(g, cmd, cmd.get_name().to_string(), &mut io::stdout());
}
