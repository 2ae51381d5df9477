//! Kiln - layered build pipeline for Rust services
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use kiln::cli::{Cli, Commands};
use kiln::config::ConfigManager;
use kiln::error::{KilnError, KilnResult};
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{} {} {}",
                style("Error:").red().bold(),
                style(format!("[{}]", e.stage())).dim(),
                e
            );
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> KilnResult<()> {
    let cli = Cli::parse();

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };

    // Local config is discovered from the project directory when one is given
    let local_config_path = if cli.no_local {
        None
    } else {
        let start = match cli.command.project() {
            Some(project) => project.to_path_buf(),
            None => std::env::current_dir()
                .map_err(|e| KilnError::io("getting current directory", e))?,
        };
        ConfigManager::find_local_config(&start)
    };

    let config = config_manager.load_merged(local_config_path.as_deref()).await?;

    init_logging(cli.verbose, &config.general.log_format);
    if let Some(ref path) = local_config_path {
        debug!("Using local config: {}", path.display());
    }

    match cli.command {
        Commands::Build(args) => kiln::cli::commands::build(args, &config).await,
        Commands::Fingerprint(args) => kiln::cli::commands::fingerprint(args, &config).await,
        Commands::Dockerfile(args) => kiln::cli::commands::dockerfile(args, &config).await,
        Commands::Cache(args) => kiln::cli::commands::cache(args, &config).await,
        Commands::Config(args) => kiln::cli::commands::config(args, &config, &config_manager).await,
    }
}

/// 0 = warn (progress output only), 1 = info, 2+ = debug
fn init_logging(verbose: u8, format: &str) {
    let filter = match verbose {
        0 => EnvFilter::new("kiln=warn"),
        1 => EnvFilter::new("kiln=info"),
        _ => EnvFilter::new("kiln=debug"),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        builder.json().init();
    } else {
        builder.without_time().init();
    }
}
