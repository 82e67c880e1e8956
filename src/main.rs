//! procrelay - queue-relayed processing API client and worker.

use clap::Parser;
use std::process::ExitCode;

use procrelay::{config, logging, Cli};

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments
    let cli = Cli::parse();

    let (settings, source) = match config::load_settings(cli.config.as_deref()) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Failed to load settings: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Keep the guard alive so buffered log lines are flushed on exit
    let _log_guard = match logging::init(
        settings.daemon.log_dir.as_deref(),
        cli.log_file_name(),
        cli.verbose,
    ) {
        Ok((guard, _)) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return ExitCode::FAILURE;
        }
    };

    source.log();

    match cli.run(&settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
