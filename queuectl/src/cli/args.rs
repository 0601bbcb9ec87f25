use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

use crate::context::{DB_PATH_ENV, DEFAULT_DB_PATH};
use crate::database::models::JobState;
use crate::queue::{DEFAULT_DLQ_LIMIT, DEFAULT_LIST_LIMIT};

#[derive(Parser, Debug)]
#[command(name = "queuectl")]
#[command(author, version, about = "Durable SQLite-backed job queue", long_about = None)]
pub struct Args {
    /// Path to the SQLite database file
    #[arg(long, global = true, env = DB_PATH_ENV, default_value = DEFAULT_DB_PATH)]
    pub db: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Add a job: {"id"?, "command", "max_retries"?, "run_at"?, "priority"?}
    Enqueue {
        /// Job as a JSON object
        json: String,
    },

    /// Manage workers
    #[command(subcommand)]
    Worker(WorkerCommand),

    /// Show job counts per state and active workers
    Status,

    /// List jobs, one JSON object per line
    List(ListArgs),

    /// Dead-letter queue
    #[command(subcommand)]
    Dlq(DlqCommand),

    /// Manage configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug)]
pub enum WorkerCommand {
    /// Start background worker processes
    Start {
        /// Number of worker processes
        #[arg(long, default_value_t = 1)]
        count: usize,
    },
    /// Ask running workers to finish their current job and exit
    Stop,
    /// Run a worker in the foreground
    Run,
}

#[derive(ClapArgs, Debug)]
pub struct ListArgs {
    /// Only jobs in this state (pending, processing, completed, failed, dead)
    #[arg(long, value_parser = parse_state)]
    pub state: Option<JobState>,

    /// Maximum number of jobs
    #[arg(long, default_value_t = DEFAULT_LIST_LIMIT)]
    pub limit: u32,
}

#[derive(Subcommand, Debug)]
pub enum DlqCommand {
    /// List dead jobs, oldest first
    List {
        #[arg(long, default_value_t = DEFAULT_DLQ_LIMIT)]
        limit: u32,
    },
    /// Move a dead job back to pending with attempts reset
    Retry {
        /// Job id
        id: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Set a configuration value
    Set { key: String, value: String },
    /// Print a configuration value; exits 1 if unset
    Get { key: String },
    /// Print every stored value as key=value
    Show,
}

fn parse_state(s: &str) -> Result<JobState, String> {
    JobState::parse(&s.to_ascii_lowercase()).ok_or_else(|| {
        let names: Vec<&str> = JobState::ALL.iter().map(|s| s.as_str()).collect();
        format!("unknown state '{}', expected one of: {}", s, names.join(", "))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_list() {
        let args = Args::try_parse_from(["queuectl", "list", "--state", "dead", "--limit", "5"])
            .unwrap();
        match args.command {
            Commands::List(list) => {
                assert_eq!(list.state, Some(JobState::Dead));
                assert_eq!(list.limit, 5);
            }
            other => panic!("unexpected command {other:?}"),
        }

        assert!(Args::try_parse_from(["queuectl", "list", "--state", "sleeping"]).is_err());
    }

    #[test]
    fn test_parse_worker_start_defaults() {
        let args = Args::try_parse_from(["queuectl", "--db", "x.db", "worker", "start"]).unwrap();
        assert_eq!(args.db, PathBuf::from("x.db"));
        assert!(matches!(
            args.command,
            Commands::Worker(WorkerCommand::Start { count: 1 })
        ));
    }

    #[test]
    fn test_db_flag_after_subcommand() {
        let args =
            Args::try_parse_from(["queuectl", "dlq", "retry", "abc", "--db", "q.db"]).unwrap();
        assert_eq!(args.db, PathBuf::from("q.db"));
        assert!(matches!(args.command, Commands::Dlq(DlqCommand::Retry { id }) if id == "abc"));
    }
}
