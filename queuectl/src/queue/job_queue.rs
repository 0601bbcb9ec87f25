//! Producer and operator facing queue operations.
//!
//! [`JobQueue`] validates input and resolves defaults before anything reaches
//! the job store; the store itself never sees malformed jobs.

use chrono::{DateTime, Utc};
use rand::random;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

use crate::config::ConfigService;
use crate::database::models::{Job, JobCounts, JobDbModel, JobState};
use crate::database::repositories::JobRepository;
use crate::database::time::datetime_to_ms;
use crate::{Error, Result};

const JOB_ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const JOB_ID_LEN: usize = 12;

/// Default page size for `list`.
pub const DEFAULT_LIST_LIMIT: u32 = 100;
/// Default page size for the dead-letter listing.
pub const DEFAULT_DLQ_LIMIT: u32 = 200;

/// Generate a short random job id from `[0-9a-z]`.
pub fn generate_job_id() -> String {
    (0..JOB_ID_LEN)
        .map(|_| {
            let idx = (random::<u32>() as usize) % JOB_ID_ALPHABET.len();
            JOB_ID_ALPHABET[idx] as char
        })
        .collect()
}

/// A validated request to add a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueRequest {
    pub id: Option<String>,
    pub command: String,
    pub max_retries: Option<u32>,
    pub run_at: Option<DateTime<Utc>>,
    pub priority: i64,
}

impl EnqueueRequest {
    /// Request for `command` with every other field defaulted.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            id: None,
            command: command.into(),
            max_retries: None,
            run_at: None,
            priority: 0,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_run_at(mut self, run_at: DateTime<Utc>) -> Self {
        self.run_at = Some(run_at);
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// Parse the JSON accepted by `queuectl enqueue`:
    /// `{"id"?, "command", "max_retries"?, "run_at"?, "priority"?}`.
    pub fn from_json(input: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(input)
            .map_err(|e| Error::validation(format!("Invalid JSON: {}", e)))?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| Error::validation("Job must be a JSON object"))?;

        let command = match obj.get("command") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            _ => return Err(Error::validation("Job must include a 'command' string")),
        };

        let id = match obj.get("id") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.is_empty() => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(_) => return Err(Error::validation("'id' must be a string or a number")),
        };

        let max_retries = match obj.get("max_retries") {
            None | Some(Value::Null) => None,
            Some(v) => Some(parse_max_retries(v)?),
        };

        let run_at = match obj.get("run_at") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(
                DateTime::parse_from_rfc3339(s)
                    .map_err(|e| {
                        Error::validation(format!("'run_at' must be an RFC 3339 timestamp: {}", e))
                    })?
                    .with_timezone(&Utc),
            ),
            Some(_) => return Err(Error::validation("'run_at' must be a string")),
        };

        Ok(Self {
            id,
            command,
            max_retries,
            run_at,
            priority: obj.get("priority").and_then(parse_priority).unwrap_or(0),
        })
    }
}

/// Whole-valued float from a JSON number or numeric string: `5.0` yes, `5.5` no.
fn integral_float(value: &Value) -> Option<f64> {
    let f = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    (f.is_finite() && f.fract() == 0.0).then_some(f)
}

fn parse_max_retries(value: &Value) -> Result<u32> {
    let exact = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    exact
        .or_else(|| {
            integral_float(value)
                .filter(|f| (0.0..=f64::from(u32::MAX)).contains(f))
                .map(|f| f as u64)
        })
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| Error::validation("'max_retries' must be a non-negative integer"))
}

/// Priorities that are not integers fall back to the default.
fn parse_priority(value: &Value) -> Option<i64> {
    let exact = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    // i64::MAX as f64 rounds up to 2^63, which is already out of range.
    exact.or_else(|| {
        integral_float(value)
            .filter(|f| *f >= i64::MIN as f64 && *f < i64::MAX as f64)
            .map(|f| f as i64)
    })
}

/// Queue facade over the job store and configuration.
pub struct JobQueue {
    jobs: Arc<dyn JobRepository>,
    config: Arc<ConfigService>,
}

impl JobQueue {
    pub fn new(jobs: Arc<dyn JobRepository>, config: Arc<ConfigService>) -> Self {
        Self { jobs, config }
    }

    /// Add a job and return its id.
    pub async fn enqueue(&self, request: EnqueueRequest) -> Result<String> {
        if request.command.is_empty() {
            return Err(Error::validation("Job must include a 'command' string"));
        }

        let id = request.id.unwrap_or_else(generate_job_id);
        let max_retries = match request.max_retries {
            Some(n) => n,
            None => self.config.max_retries().await?,
        };
        let row = JobDbModel::new_pending(
            id.clone(),
            request.command,
            max_retries,
            request.priority,
            request.run_at.map(datetime_to_ms),
        );
        self.jobs.create_job(&row).await?;

        info!(
            job_id = %id,
            priority = request.priority,
            max_retries,
            "Enqueued job"
        );
        Ok(id)
    }

    pub async fn get(&self, id: &str) -> Result<Job> {
        self.jobs
            .get_job(id)
            .await?
            .ok_or_else(|| Error::not_found("Job", id))
    }

    pub async fn list(&self, state: Option<JobState>, limit: u32) -> Result<Vec<Job>> {
        self.jobs.list_jobs(state, limit).await
    }

    pub async fn dead_letters(&self, limit: u32) -> Result<Vec<Job>> {
        self.jobs.list_jobs(Some(JobState::Dead), limit).await
    }

    /// Requeue a dead job. `false` means it was missing or not dead.
    pub async fn retry_dead(&self, id: &str) -> Result<bool> {
        let moved = self.jobs.dlq_retry(id).await?;
        if moved {
            info!(job_id = %id, "Moved job from dead-letter queue to pending");
        }
        Ok(moved)
    }

    pub async fn stats(&self) -> Result<JobCounts> {
        self.jobs.counts_by_state().await
    }
}
