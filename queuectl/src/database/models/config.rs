//! Configuration database models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One row of the `config` key/value table.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct ConfigEntryDbModel {
    pub key: String,
    pub value: String,
}

impl ConfigEntryDbModel {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Configuration keys the queue understands.
///
/// Every recognized key holds a non-negative integer. Any other key is
/// stored verbatim.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::EnumIter,
)]
#[strum(serialize_all = "snake_case")]
pub enum ConfigKey {
    /// Default retry budget for jobs enqueued without one.
    MaxRetries,
    /// Base of the exponential backoff, in seconds.
    BackoffBase,
    /// Idle sleep between empty polls.
    PollIntervalMs,
    /// Per-job execution timeout; 0 disables it.
    JobTimeoutMs,
}

impl ConfigKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MaxRetries => "max_retries",
            Self::BackoffBase => "backoff_base",
            Self::PollIntervalMs => "poll_interval_ms",
            Self::JobTimeoutMs => "job_timeout_ms",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "max_retries" => Some(Self::MaxRetries),
            "backoff_base" => Some(Self::BackoffBase),
            "poll_interval_ms" => Some(Self::PollIntervalMs),
            "job_timeout_ms" => Some(Self::JobTimeoutMs),
            _ => None,
        }
    }

    /// Value used when the key is absent or unreadable.
    pub fn default_value(&self) -> u64 {
        match self {
            Self::MaxRetries => 3,
            Self::BackoffBase => 2,
            Self::PollIntervalMs => 500,
            Self::JobTimeoutMs => 0,
        }
    }

    /// Whether the default is written to the table on startup.
    pub fn is_seeded(&self) -> bool {
        !matches!(self, Self::JobTimeoutMs)
    }
}
