//! Ripline CLI - Command-line interface
//!
//! This binary provides a command-line interface to the ripline library:
//! the long-running pipeline loops (`run ...`), plan inspection, and the
//! per-track status rollup.

use clap::{Parser, Subcommand};
use ripline::config::Settings;
use std::path::PathBuf;

mod commands;
mod error;

use error::CliError;

#[derive(Parser)]
#[command(name = "ripline")]
#[command(version = ripline::VERSION)]
#[command(about = "Optical disc backup pipeline", long_about = None)]
struct Cli {
    /// Data root (defaults to ~/.ripline; RIPLINE_ROOT also overrides)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a pipeline loop or record review verdicts
    Run {
        #[command(subcommand)]
        stage: commands::run::RunCommand,
    },
    /// Inspect backup plans
    Plan {
        #[command(subcommand)]
        action: commands::plan::PlanCommand,
    },
    /// Show per-track pipeline status
    Status {
        /// Limit output to one disc
        disc_id: Option<String>,
    },
    /// Maintenance and verification helpers
    #[command(hide = true)]
    Internal {
        #[command(subcommand)]
        action: commands::internal::InternalCommand,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut settings = Settings::from_env();
    if let Some(root) = cli.root {
        settings.root = root;
    }

    // The long-running loops log through tracing; one-shot query commands
    // print plain output instead.
    let _guard = if matches!(cli.command, Command::Run { .. }) {
        match ripline::logging::init_logging(&settings.root.join("logs")) {
            Ok(guard) => Some(guard),
            Err(e) => CliError::LoggingInit(e.to_string()).exit(),
        }
    } else {
        None
    };

    let result = match cli.command {
        Command::Run { stage } => commands::run::execute(stage, &settings).await,
        Command::Plan { action } => commands::plan::execute(action, &settings).await,
        Command::Status { disc_id } => commands::status::execute(disc_id, &settings).await,
        Command::Internal { action } => commands::internal::execute(action).await,
    };

    if let Err(e) = result {
        e.exit();
    }
}
