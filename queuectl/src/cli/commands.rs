use anyhow::Context;
use std::path::Path;
use std::process::ExitCode;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::args::{Args, Commands, ConfigCommand, DlqCommand, ListArgs, WorkerCommand};
use crate::context::AppContext;
use crate::database::models::{Job, JobState};
use crate::logging;
use crate::queue::{EnqueueRequest, worker_id_from_env};
use crate::supervisor::WorkerSupervisor;

/// Execute a parsed command line.
///
/// Errors are returned to the caller; a clean non-zero exit without a
/// message (such as `config get` on a missing key) is reported through the
/// exit code.
pub async fn execute(args: Args) -> anyhow::Result<ExitCode> {
    // Supervisor commands never touch the database.
    let command = match args.command {
        Commands::Worker(WorkerCommand::Start { count }) => return start_workers(count, &args.db),
        Commands::Worker(WorkerCommand::Stop) => return stop_workers(),
        command => command,
    };

    let ctx = AppContext::connect(&args.db)
        .await
        .with_context(|| format!("Failed to open database {}", args.db.display()))?;
    let result = dispatch(&ctx, command).await;
    ctx.close().await;
    result
}

async fn dispatch(ctx: &AppContext, command: Commands) -> anyhow::Result<ExitCode> {
    match command {
        Commands::Enqueue { json } => {
            let request = EnqueueRequest::from_json(&json)?;
            let id = ctx.queue.enqueue(request).await?;
            println!("{}", id);
        }
        // Only `worker run` gets this far.
        Commands::Worker(_) => run_worker(ctx).await?,
        Commands::Status => {
            let counts = ctx.queue.stats().await?;
            for state in JobState::ALL {
                println!("{:<12}{}", state.as_str(), counts.get(state));
            }
            println!("{:<12}{}", "total", counts.total());

            let active = WorkerSupervisor::from_env().active()?;
            let pids: Vec<String> = active.iter().map(|p| p.to_string()).collect();
            println!("Active workers: {} [{}]", active.len(), pids.join(", "));
        }
        Commands::List(ListArgs { state, limit }) => {
            print_jobs(&ctx.queue.list(state, limit).await?)?;
        }
        Commands::Dlq(DlqCommand::List { limit }) => {
            print_jobs(&ctx.queue.dead_letters(limit).await?)?;
        }
        Commands::Dlq(DlqCommand::Retry { id }) => {
            if !ctx.queue.retry_dead(&id).await? {
                anyhow::bail!("Job '{}' not found in the dead-letter queue", id);
            }
            println!("Job {} moved to pending with attempts=0", id);
        }
        Commands::Config(ConfigCommand::Set { key, value }) => {
            ctx.config.set(&key, &value).await?;
            let stored = ctx.config.get(&key).await?.unwrap_or(value);
            println!("OK: {}={}", key, stored);
        }
        Commands::Config(ConfigCommand::Get { key }) => match ctx.config.get(&key).await? {
            Some(value) => println!("{}", value),
            None => return Ok(ExitCode::FAILURE),
        },
        Commands::Config(ConfigCommand::Show) => {
            for entry in ctx.config.entries().await? {
                println!("{}={}", entry.key, entry.value);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn start_workers(count: usize, db_path: &Path) -> anyhow::Result<ExitCode> {
    let pids = WorkerSupervisor::from_env().start(count, db_path)?;
    for pid in &pids {
        println!("Started worker PID {}", pid);
    }
    Ok(ExitCode::SUCCESS)
}

fn stop_workers() -> anyhow::Result<ExitCode> {
    let supervisor = WorkerSupervisor::from_env();
    if supervisor.recorded()?.is_empty() {
        println!("No worker PIDs found.");
        return Ok(ExitCode::SUCCESS);
    }
    let signalled = supervisor.stop()?;
    println!("Stop requested for {} workers.", signalled);
    Ok(ExitCode::SUCCESS)
}

fn print_jobs(jobs: &[Job]) -> anyhow::Result<()> {
    for job in jobs {
        println!("{}", serde_json::to_string(job)?);
    }
    Ok(())
}

async fn run_worker(ctx: &AppContext) -> anyhow::Result<()> {
    let log_dir = logging::default_log_dir(&ctx.db_path);
    if let Err(e) = logging::cleanup_old_logs(&log_dir).await {
        warn!("Failed to clean up old logs in {}: {}", log_dir.display(), e);
    }

    let worker = ctx.shell_worker(worker_id_from_env());
    info!(worker_id = %worker.id(), pid = std::process::id(), "Starting worker");

    let token = worker.cancellation_token().clone();
    tokio::spawn(cancel_on_shutdown_signal(token));

    worker.run().await?;
    Ok(())
}

/// Cancel `token` on Ctrl+C or SIGTERM.
async fn cancel_on_shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, finishing current job before exit"),
        _ = terminate => info!("Received SIGTERM, finishing current job before exit"),
        _ = token.cancelled() => return,
    }
    token.cancel();
}
