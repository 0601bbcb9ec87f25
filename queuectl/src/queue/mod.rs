//! Job queue: enqueue facade, retry backoff, command execution and workers.

pub mod backoff;
pub mod executor;
pub mod job_queue;
pub mod worker;

pub use backoff::BackoffPolicy;
pub use executor::{CommandExecutor, CommandOutput, ExecutionOutcome, ShellExecutor};
pub use job_queue::{DEFAULT_DLQ_LIMIT, DEFAULT_LIST_LIMIT, EnqueueRequest, JobQueue};
pub use worker::{JobDisposition, ProcessedJob, Worker, worker_id_from_env};
