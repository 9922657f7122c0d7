//! Lifecycle - buildpack layer cache analysis and image export
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use lifecycle::cli::{Cli, Commands};
use lifecycle::config::ConfigManager;
use lifecycle::error::LifecycleResult;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

fn run() -> LifecycleResult<()> {
    let cli = Cli::parse();

    // 0 = warn, 1 = info, 2+ = debug; RUST_LOG wins when set
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match cli.verbose {
        0 => EnvFilter::new("lifecycle=warn"),
        1 => EnvFilter::new("lifecycle=info"),
        _ => EnvFilter::new("lifecycle=debug"),
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    debug!("Using config {}", config_manager.path().display());
    let config = config_manager.load()?;

    match cli.command {
        Commands::Analyze(args) => lifecycle::cli::commands::analyze(args, &config),
        Commands::Export(args) => lifecycle::cli::commands::export(args, &config),
    }
}
