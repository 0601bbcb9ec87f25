//! Polling worker.
//!
//! A worker claims one eligible job at a time, runs its command and records
//! the outcome. Cancellation is checked between jobs only, so a running
//! command is always allowed to finish.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backoff::BackoffPolicy;
use super::executor::{CommandExecutor, ExecutionOutcome};
use crate::Result;
use crate::config::ConfigService;
use crate::database::models::Job;
use crate::database::repositories::JobRepository;

/// Environment variable overriding the generated worker id.
pub const WORKER_ID_ENV: &str = "WORKER_ID";

/// Worker id from `WORKER_ID`, or a fresh UUID.
pub fn worker_id_from_env() -> String {
    std::env::var(WORKER_ID_ENV)
        .ok()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

/// What happened to a job after one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobDisposition {
    Completed,
    /// Back to `pending`, eligible again at `available_at`.
    Retrying {
        attempts: u32,
        available_at: DateTime<Utc>,
    },
    /// Retry budget exhausted.
    Dead { attempts: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedJob {
    pub job_id: String,
    pub disposition: JobDisposition,
}

pub struct Worker {
    id: String,
    jobs: Arc<dyn JobRepository>,
    config: Arc<ConfigService>,
    executor: Arc<dyn CommandExecutor>,
    cancellation_token: CancellationToken,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        jobs: Arc<dyn JobRepository>,
        config: Arc<ConfigService>,
        executor: Arc<dyn CommandExecutor>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            id: id.into(),
            jobs,
            config,
            executor,
            cancellation_token,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    /// Run until cancelled.
    ///
    /// Store errors end the loop and are returned; command failures never do.
    pub async fn run(&self) -> Result<()> {
        let poll_interval = self.config.settings().await?.poll_interval;
        info!(
            worker_id = %self.id,
            poll_interval_ms = poll_interval.as_millis() as u64,
            "Worker started"
        );

        let mut processed: u64 = 0;
        loop {
            if self.cancellation_token.is_cancelled() {
                break;
            }

            match self.process_next().await? {
                Some(_) => processed += 1,
                None => {
                    tokio::select! {
                        _ = self.cancellation_token.cancelled() => break,
                        _ = tokio::time::sleep(poll_interval) => {}
                    }
                }
            }
        }

        info!(worker_id = %self.id, processed, "Worker stopped");
        Ok(())
    }

    /// Claim and execute at most one job.
    ///
    /// Returns `None` when no job was eligible.
    pub async fn process_next(&self) -> Result<Option<ProcessedJob>> {
        let Some(job) = self.jobs.claim_next_job(&self.id).await? else {
            return Ok(None);
        };

        // One snapshot per job, so `config set` applies from the next claim.
        let settings = self.config.settings().await?;
        info!(
            worker_id = %self.id,
            job_id = %job.id,
            attempt = job.attempts + 1,
            "Running job: {}",
            job.command
        );

        let outcome = self.executor.run(&job.command, settings.job_timeout).await;
        let policy = BackoffPolicy::new(settings.backoff_base);
        let disposition = self.record_outcome(&job, &outcome, policy).await?;

        Ok(Some(ProcessedJob {
            job_id: job.id,
            disposition,
        }))
    }

    async fn record_outcome(
        &self,
        job: &Job,
        outcome: &ExecutionOutcome,
        policy: BackoffPolicy,
    ) -> Result<JobDisposition> {
        let elapsed_ms = outcome.duration().as_millis() as u64;

        let message = match outcome.error_message() {
            None => {
                self.jobs.complete(&job.id).await?;
                info!(job_id = %job.id, elapsed_ms, "Job completed");
                return Ok(JobDisposition::Completed);
            }
            Some(message) => message,
        };

        let attempts = job.attempts.saturating_add(1);
        if job.next_failure_is_fatal() {
            self.jobs.move_to_dead(&job.id, message).await?;
            warn!(
                job_id = %job.id,
                attempts,
                elapsed_ms,
                "Job moved to dead-letter queue: {}",
                message
            );
            return Ok(JobDisposition::Dead { attempts });
        }

        let available_at = policy.next_available_at(Utc::now(), attempts);
        self.jobs
            .fail_and_requeue(&job.id, message, available_at, attempts)
            .await?;
        warn!(
            job_id = %job.id,
            attempts,
            max_retries = job.max_retries,
            retry_in_secs = policy.delay_seconds(attempts),
            "Job failed, scheduled for retry: {}",
            message
        );
        debug!(job_id = %job.id, %available_at, "Retry scheduled");

        Ok(JobDisposition::Retrying {
            attempts,
            available_at,
        })
    }
}
