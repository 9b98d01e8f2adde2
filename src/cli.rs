// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: `release <environment>` triggers a release; subcommands inspect and control attempts.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use release_sequencer::output::OutputMode;

#[derive(Parser)]
#[command(name = "release")]
#[command(about = "Test, build, push and deploy a service with health-gated rollback")]
#[command(version)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Environment to release to
    pub environment: Option<String>,

    /// Source revision to release (defaults to $GITHUB_SHA, then `git rev-parse HEAD`)
    #[arg(short, long)]
    pub source: Option<String>,

    /// Break an existing environment lock
    #[arg(short, long)]
    pub force: bool,

    /// Path to release.yml (discovered in the current directory by default)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding attempts, locks and the audit log
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only print the final result
    #[arg(short, long, global = true, conflicts_with = "json")]
    pub quiet: bool,

    /// Print JSON lines instead of text
    #[arg(long, global = true)]
    pub json: bool,
}

/// `status` reserves 1 and 2 for the attempt's own stage.
pub const STATUS_ERROR_EXIT_CODE: i32 = 3;

impl Cli {
    /// Exit code when the command itself fails.
    pub fn error_exit_code(&self) -> i32 {
        match self.command {
            Some(Commands::Status { .. }) => STATUS_ERROR_EXIT_CODE,
            _ => 1,
        }
    }

    pub fn output_mode(&self) -> OutputMode {
        if self.json {
            OutputMode::Json
        } else if self.quiet {
            OutputMode::Quiet
        } else {
            OutputMode::Normal
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a release.yml template
    Init {
        /// Service name for the template
        #[arg(long)]
        service: Option<String>,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Show an attempt (exit 0 succeeded, 1 failed or rolled back, 2 in progress, 3 error)
    Status {
        attempt_id: String,
    },

    /// Ask a running attempt to stop, rolling back if it has touched the platform
    Abort {
        attempt_id: String,
    },

    /// List finished attempts from the audit log
    History {
        /// Only show this environment
        environment: Option<String>,

        /// Show at most this many records, newest first
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },
}
