pub mod daemon;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

/// ccusage-daemon - keeps the Claude usage cache fresh in the background
#[derive(Parser, Debug)]
#[command(
    name = "ccusage-daemon",
    version,
    about = "Keeps the Claude usage cache fresh while Claude is running"
)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Data directory (PID marker, cache, log)
    #[arg(long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Run the daemon in the foreground (default)
    Run,

    /// Show daemon status and the cached usage
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Stop a running daemon
    Stop {
        /// Kill the daemon process instead of asking it to exit
        #[arg(long)]
        force: bool,
    },
}

impl Cli {
    pub fn config_path(&self) -> Option<&Path> {
        self.config.as_deref()
    }

    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }
}

/// Dispatch the CLI command to the appropriate handler.
pub async fn dispatch(cli: &Cli) -> anyhow::Result<()> {
    match cli.command.as_ref().unwrap_or(&Commands::Run) {
        Commands::Run => daemon::cmd_run(cli.config_path(), cli.data_dir(), cli.verbose).await,
        Commands::Status { json } => {
            daemon::cmd_status(cli.config_path(), cli.data_dir(), *json).await
        }
        Commands::Stop { force } => daemon::cmd_stop(cli.config_path(), cli.data_dir(), *force),
    }
}
