//! Kettle CLI - build, install and verify packages from recipes

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Cli, Commands, MessageFormat};
use kettle::builder::InstallEvent;
use kettle::util::diagnostic::emit;
use kettle::util::Shell;
use kettle::RecipeError;

fn main() {
    let cli = Cli::parse();

    let json = cli.message_format == MessageFormat::Json;
    init_logging(cli.verbose, cli.quiet || json);

    let shell = Arc::new(Shell::from_flags(cli.quiet, cli.verbose, cli.color, json));

    if let Err(e) = run(cli.command, &shell) {
        report_error(&shell, &e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if verbose {
        EnvFilter::new("kettle=debug")
    } else if quiet {
        EnvFilter::new("kettle=warn")
    } else {
        EnvFilter::new("kettle=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

fn run(command: Commands, shell: &Arc<Shell>) -> Result<()> {
    match command {
        Commands::Install(args) => commands::install::execute(args, shell),
        Commands::Test(args) => commands::test::execute(args, shell),
        Commands::Env(args) => commands::env::execute(args, shell),
        Commands::Plan(args) => commands::plan::execute(args, shell),
        Commands::Toolchain(args) => commands::toolchain::execute(args, shell),
        Commands::Doctor(args) => commands::doctor::execute(args, shell),
        Commands::Completions(args) => commands::completions::execute(args),
    }
}

/// Render an error, with the full diagnostic for engine errors.
fn report_error(shell: &Shell, err: &anyhow::Error) {
    if shell.is_json() {
        shell.json_line(&InstallEvent::error(format!("{:#}", err)));
        return;
    }

    match err.downcast_ref::<RecipeError>() {
        Some(recipe_err) => emit(&recipe_err.to_diagnostic(), shell.use_color()),
        None => shell.error(format!("{:#}", err)),
    }
}
