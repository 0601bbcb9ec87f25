//! Job repository.
//!
//! Every state transition of the job state machine is a single guarded
//! statement or an immediate transaction, so callers need no external
//! locking:
//!
//! ```text
//! pending --claim--> processing --complete--> completed
//!                    processing --fail------> pending (backoff) | dead
//! dead --dlq_retry--> pending
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::database::begin_immediate;
use crate::database::models::{Job, JobCounts, JobDbModel, JobState};
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::{datetime_to_ms, now_ms};
use crate::{Error, Result};

/// Job repository trait.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a new `pending` job. A duplicate id is a validation error.
    async fn create_job(&self, job: &JobDbModel) -> Result<()>;
    async fn get_job(&self, id: &str) -> Result<Option<Job>>;

    /// Atomically claim the next eligible job for `worker_id`.
    ///
    /// Returns `None` when nothing is eligible or when another worker won
    /// the race for the selected candidate.
    async fn claim_next_job(&self, worker_id: &str) -> Result<Option<Job>>;
    async fn complete(&self, id: &str) -> Result<()>;
    async fn fail_and_requeue(
        &self,
        id: &str,
        error: &str,
        next_available_at: DateTime<Utc>,
        new_attempts: u32,
    ) -> Result<()>;
    async fn move_to_dead(&self, id: &str, error: &str) -> Result<()>;

    /// Move a dead job back to `pending` with a fresh retry budget.
    ///
    /// Returns `false` without touching anything if the job is missing or
    /// not dead.
    async fn dlq_retry(&self, id: &str) -> Result<bool>;

    /// With a state: oldest first. Without: newest first across all states.
    async fn list_jobs(&self, state: Option<JobState>, limit: u32) -> Result<Vec<Job>>;
    async fn counts_by_state(&self) -> Result<JobCounts>;
}

/// SQLx implementation of JobRepository.
pub struct SqlxJobRepository {
    pool: SqlitePool,
}

impl SqlxJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn try_claim(&self, worker_id: &str) -> Result<Option<Job>> {
        let mut tx = begin_immediate(&self.pool).await?;
        let now = now_ms();

        let candidate = sqlx::query_as::<_, JobDbModel>(
            r#"
            SELECT * FROM jobs
            WHERE state = 'pending' AND available_at <= ?
            ORDER BY priority DESC, created_at ASC, rowid ASC
            LIMIT 1
            "#,
        )
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(mut row) = candidate else {
            tx.rollback().await?;
            return Ok(None);
        };

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'processing', locked_by = ?, locked_at = ?, updated_at = ?
            WHERE id = ? AND state = 'pending'
            "#,
        )
        .bind(worker_id)
        .bind(now)
        .bind(now)
        .bind(&row.id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            debug!("Lost claim race for job {}", row.id);
            return Ok(None);
        }
        tx.commit().await?;

        row.state = JobState::Processing.as_str().to_string();
        row.locked_by = Some(worker_id.to_string());
        row.locked_at = Some(now);
        row.updated_at = now;
        Job::try_from(row).map(Some)
    }

    async fn try_fail_and_requeue(
        &self,
        id: &str,
        error: &str,
        next_available_at: i64,
        new_attempts: u32,
    ) -> Result<u64> {
        let mut tx = begin_immediate(&self.pool).await?;
        let now = now_ms();

        let failed = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'failed', attempts = ?, last_error = ?,
                locked_by = NULL, locked_at = NULL, updated_at = ?
            WHERE id = ? AND state = 'processing'
            "#,
        )
        .bind(i64::from(new_attempts))
        .bind(error)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if failed.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(0);
        }

        let requeued = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'pending', available_at = ?, updated_at = ?
            WHERE id = ? AND state = 'failed'
            "#,
        )
        .bind(next_available_at)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(requeued.rows_affected())
    }
}

#[async_trait]
impl JobRepository for SqlxJobRepository {
    async fn create_job(&self, job: &JobDbModel) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO jobs (id, command, state, attempts, max_retries, priority,
                              created_at, updated_at, available_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.command)
        .bind(&job.state)
        .bind(job.attempts)
        .bind(job.max_retries)
        .bind(job.priority)
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.available_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Err(
                Error::validation(format!("Job with id '{}' already exists", job.id)),
            ),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_job(&self, id: &str) -> Result<Option<Job>> {
        sqlx::query_as::<_, JobDbModel>("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Job::try_from)
            .transpose()
    }

    async fn claim_next_job(&self, worker_id: &str) -> Result<Option<Job>> {
        retry_on_sqlite_busy("claim_next_job", move || self.try_claim(worker_id)).await
    }

    async fn complete(&self, id: &str) -> Result<()> {
        let result = retry_on_sqlite_busy("complete", move || async move {
            let now = now_ms();
            let done = sqlx::query(
                r#"
                UPDATE jobs
                SET state = 'completed', locked_by = NULL, locked_at = NULL,
                    last_error = NULL, updated_at = ?
                WHERE id = ? AND state = 'processing'
                "#,
            )
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
            Ok::<_, Error>(done.rows_affected())
        })
        .await?;

        if result == 0 {
            warn!("Job {} was not processing; completion ignored", id);
        }
        Ok(())
    }

    async fn fail_and_requeue(
        &self,
        id: &str,
        error: &str,
        next_available_at: DateTime<Utc>,
        new_attempts: u32,
    ) -> Result<()> {
        let next_ms = datetime_to_ms(next_available_at);
        let result = retry_on_sqlite_busy("fail_and_requeue", move || {
            self.try_fail_and_requeue(id, error, next_ms, new_attempts)
        })
        .await?;

        if result == 0 {
            warn!("Job {} was not processing; requeue ignored", id);
        }
        Ok(())
    }

    async fn move_to_dead(&self, id: &str, error: &str) -> Result<()> {
        let result = retry_on_sqlite_busy("move_to_dead", move || async move {
            let now = now_ms();
            let done = sqlx::query(
                r#"
                UPDATE jobs
                SET state = 'dead', attempts = attempts + 1, last_error = ?,
                    locked_by = NULL, locked_at = NULL, updated_at = ?
                WHERE id = ? AND state = 'processing'
                "#,
            )
            .bind(error)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
            Ok::<_, Error>(done.rows_affected())
        })
        .await?;

        if result == 0 {
            warn!("Job {} was not processing; dead-letter move ignored", id);
        }
        Ok(())
    }

    async fn dlq_retry(&self, id: &str) -> Result<bool> {
        let result = retry_on_sqlite_busy("dlq_retry", move || async move {
            let now = now_ms();
            let done = sqlx::query(
                r#"
                UPDATE jobs
                SET state = 'pending', attempts = 0, available_at = ?, last_error = NULL,
                    locked_by = NULL, locked_at = NULL, updated_at = ?
                WHERE id = ? AND state = 'dead'
                "#,
            )
            .bind(now)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
            Ok::<_, Error>(done.rows_affected())
        })
        .await?;

        Ok(result == 1)
    }

    async fn list_jobs(&self, state: Option<JobState>, limit: u32) -> Result<Vec<Job>> {
        let rows = match state {
            Some(state) => {
                sqlx::query_as::<_, JobDbModel>(
                    "SELECT * FROM jobs WHERE state = ? ORDER BY created_at ASC, rowid ASC LIMIT ?",
                )
                .bind(state.as_str())
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, JobDbModel>(
                    "SELECT * FROM jobs ORDER BY created_at DESC, rowid DESC LIMIT ?",
                )
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(Job::try_from).collect()
    }

    async fn counts_by_state(&self) -> Result<JobCounts> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT state, COUNT(*) FROM jobs GROUP BY state",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts = JobCounts::default();
        for (state, count) in rows {
            match JobState::parse(&state) {
                Some(state) => counts.set(state, count.max(0) as u64),
                None => warn!("Ignoring {} jobs with unknown state '{}'", count, state),
            }
        }
        Ok(counts)
    }
}
