use clap::Parser;
use std::process::ExitCode;
use tracing::error;

use queuectl::cli::{self, Args, Commands, WorkerCommand};
use queuectl::logging::{self, LogTarget};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let target = match args.command {
        Commands::Worker(WorkerCommand::Run) => LogTarget::Worker {
            log_dir: logging::default_log_dir(&args.db),
        },
        _ => LogTarget::Console,
    };
    let _guard = match logging::init_logging(&target) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match cli::execute(args).await {
        Ok(code) => code,
        Err(e) => {
            match target {
                // Reaches both stderr and the worker log file.
                LogTarget::Worker { .. } => error!("Worker failed: {:#}", e),
                LogTarget::Console => eprintln!("Error: {:#}", e),
            }
            ExitCode::FAILURE
        }
    }
}
