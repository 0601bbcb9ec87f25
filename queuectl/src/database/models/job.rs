//! Job database models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::{ms_to_datetime, now_ms};
use crate::{Error, Result};

/// Job database model.
/// Mirrors a row of the `jobs` table; timestamps are epoch milliseconds.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct JobDbModel {
    pub id: String,
    /// Shell command to execute.
    pub command: String,
    /// State: pending, processing, completed, failed, dead
    pub state: String,
    pub attempts: i64,
    pub max_retries: i64,
    pub priority: i64,
    pub created_at: i64,
    pub updated_at: i64,
    /// Earliest time the job may be claimed.
    pub available_at: i64,
    pub locked_by: Option<String>,
    pub locked_at: Option<i64>,
    pub last_error: Option<String>,
}

impl JobDbModel {
    /// Build a fresh `pending` row.
    pub fn new_pending(
        id: impl Into<String>,
        command: impl Into<String>,
        max_retries: u32,
        priority: i64,
        available_at: Option<i64>,
    ) -> Self {
        let now = now_ms();
        Self {
            id: id.into(),
            command: command.into(),
            state: JobState::Pending.as_str().to_string(),
            attempts: 0,
            max_retries: i64::from(max_retries),
            priority,
            created_at: now,
            updated_at: now,
            available_at: available_at.unwrap_or(now),
            locked_by: None,
            locked_at: None,
            last_error: None,
        }
    }
}

/// Job state values.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Waiting for `available_at`, then for a worker to claim it.
    Pending,
    /// Claimed by exactly one worker.
    Processing,
    /// Finished successfully.
    Completed,
    /// Transient; a failed job is immediately requeued or moved to dead.
    Failed,
    /// Retries exhausted; waits in the dead-letter queue.
    Dead,
}

impl JobState {
    pub const ALL: [JobState; 5] = [
        Self::Pending,
        Self::Processing,
        Self::Completed,
        Self::Failed,
        Self::Dead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Dead => "dead",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "dead" => Some(Self::Dead),
            _ => None,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Dead)
    }
}

/// A job as seen by the rest of the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub command: String,
    pub state: JobState,
    pub attempts: u32,
    pub max_retries: u32,
    pub priority: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub available_at: DateTime<Utc>,
    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Job {
    /// Whether a worker may claim this job at `now`.
    pub fn is_eligible_at(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Pending && self.available_at <= now
    }

    /// Whether one more failure would exhaust the retry budget.
    pub fn next_failure_is_fatal(&self) -> bool {
        self.attempts.saturating_add(1) > self.max_retries
    }
}

impl TryFrom<JobDbModel> for Job {
    type Error = Error;

    fn try_from(row: JobDbModel) -> Result<Self> {
        let state = JobState::parse(&row.state).ok_or_else(|| {
            Error::Database(format!("job {} has unknown state '{}'", row.id, row.state))
        })?;
        let attempts = u32::try_from(row.attempts).map_err(|_| {
            Error::Database(format!("job {} has invalid attempts {}", row.id, row.attempts))
        })?;
        let max_retries = u32::try_from(row.max_retries).map_err(|_| {
            Error::Database(format!(
                "job {} has invalid max_retries {}",
                row.id, row.max_retries
            ))
        })?;

        Ok(Self {
            id: row.id,
            command: row.command,
            state,
            attempts,
            max_retries,
            priority: row.priority,
            created_at: ms_to_datetime(row.created_at),
            updated_at: ms_to_datetime(row.updated_at),
            available_at: ms_to_datetime(row.available_at),
            locked_by: row.locked_by,
            locked_at: row.locked_at.map(ms_to_datetime),
            last_error: row.last_error,
        })
    }
}

/// Number of jobs in each state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub dead: u64,
}

impl JobCounts {
    pub fn get(&self, state: JobState) -> u64 {
        match state {
            JobState::Pending => self.pending,
            JobState::Processing => self.processing,
            JobState::Completed => self.completed,
            JobState::Failed => self.failed,
            JobState::Dead => self.dead,
        }
    }

    pub fn set(&mut self, state: JobState, count: u64) {
        match state {
            JobState::Pending => self.pending = count,
            JobState::Processing => self.processing = count,
            JobState::Completed => self.completed = count,
            JobState::Failed => self.failed = count,
            JobState::Dead => self.dead = count,
        }
    }

    pub fn total(&self) -> u64 {
        JobState::ALL.iter().map(|s| self.get(*s)).sum()
    }
}
