use std::process::ExitCode;

use clap::Parser;

use ccusage_daemon::cli::{self, Cli, Commands};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // `run` installs its own file logging; other commands only log to stderr.
    let runs_daemon = matches!(cli.command, None | Some(Commands::Run));
    if !runs_daemon {
        let level = if cli.verbose { "debug" } else { "warn" };
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| level.into()),
            )
            .with_writer(std::io::stderr)
            .try_init();
    }

    match cli::dispatch(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
