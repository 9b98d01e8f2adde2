// ABOUTME: Entry point for the release CLI application.
// ABOUTME: Parses arguments, sets up tracing and dispatches to command handlers.

mod cli;
mod commands;

use clap::{CommandFactory, Parser};
use cli::{Cli, Commands};
use commands::Locations;
use release_sequencer::config;
use release_sequencer::error::{Error, Result};
use release_sequencer::output::Output;
use std::env;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // RUST_LOG wins over the verbose flag when set
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("warn")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let output = Output::new(cli.output_mode());
    let error_code = cli.error_exit_code();
    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            output.error(&e.to_string());
            error_code
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let locations = Locations {
        cwd: env::current_dir()?,
        config: cli.config.clone(),
        state_dir: cli.state_dir.clone(),
    };
    let output = Output::new(cli.output_mode());

    match cli.command {
        Some(Commands::Init { service, force }) => {
            config::init_config(&locations.cwd, service.as_deref(), force)?;
            output.success(&format!("Created {}", config::CONFIG_FILENAME));
            Ok(0)
        }
        Some(Commands::Status { attempt_id }) => commands::status(&locations, &attempt_id, output),
        Some(Commands::Abort { attempt_id }) => commands::abort(&locations, &attempt_id, output),
        Some(Commands::History { environment, limit }) => {
            commands::history(&locations, environment.as_deref(), limit, output)
        }
        None => match cli.environment {
            Some(environment) => {
                commands::release(&locations, &environment, cli.source, cli.force, output).await
            }
            None => {
                Cli::command().print_help()?;
                Err(Error::InvalidArgument("an environment is required".to_string()))
            }
        },
    }
}
