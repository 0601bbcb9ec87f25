//! Configuration service implementation.
//!
//! The ConfigService validates writes to recognized keys and resolves typed
//! settings (falling back to defaults) for the queue and its workers.

use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::database::models::{ConfigEntryDbModel, ConfigKey};
use crate::database::repositories::ConfigRepository;
use crate::{Error, Result};

/// Typed snapshot of the queue settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSettings {
    pub max_retries: u32,
    pub backoff_base: u64,
    pub poll_interval: Duration,
    /// `None` means commands may run indefinitely.
    pub job_timeout: Option<Duration>,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_retries: ConfigKey::MaxRetries.default_value() as u32,
            backoff_base: ConfigKey::BackoffBase.default_value(),
            poll_interval: Duration::from_millis(ConfigKey::PollIntervalMs.default_value()),
            job_timeout: None,
        }
    }
}

/// Configuration service backed by a [`ConfigRepository`].
pub struct ConfigService {
    repo: Arc<dyn ConfigRepository>,
}

impl ConfigService {
    /// Create a new ConfigService.
    pub fn new(repo: Arc<dyn ConfigRepository>) -> Self {
        Self { repo }
    }

    /// Write missing defaults for the seeded keys.
    pub async fn seed_defaults(&self) -> Result<()> {
        self.repo.seed_defaults().await
    }

    /// Raw value of any key, recognized or not.
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        self.repo.get_value(key).await
    }

    /// Store a value.
    ///
    /// Recognized keys must hold a non-negative integer; the normalized number
    /// is stored. Unknown keys are stored verbatim.
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        match ConfigKey::parse(key) {
            Some(known) => {
                let n = validate_value(known, value)?;
                self.repo.set_value(key, &n.to_string()).await
            }
            None => self.repo.set_value(key, value).await,
        }
    }

    /// All stored entries ordered by key.
    pub async fn entries(&self) -> Result<Vec<ConfigEntryDbModel>> {
        self.repo.list_values().await
    }

    /// Resolve a recognized key as a number.
    ///
    /// Missing or unparsable values fall back to the key's default.
    pub async fn get_u64(&self, key: ConfigKey) -> Result<u64> {
        let Some(raw) = self.repo.get_value(key.as_str()).await? else {
            return Ok(key.default_value());
        };
        match validate_value(key, &raw) {
            Ok(n) => Ok(n),
            Err(_) => {
                warn!(
                    key = %key,
                    value = %raw,
                    "Ignoring invalid stored config value, using default"
                );
                Ok(key.default_value())
            }
        }
    }

    pub async fn max_retries(&self) -> Result<u32> {
        let n = self.get_u64(ConfigKey::MaxRetries).await?;
        Ok(u32::try_from(n).unwrap_or(u32::MAX))
    }

    pub async fn backoff_base(&self) -> Result<u64> {
        self.get_u64(ConfigKey::BackoffBase).await
    }

    pub async fn poll_interval(&self) -> Result<Duration> {
        Ok(Duration::from_millis(
            self.get_u64(ConfigKey::PollIntervalMs).await?,
        ))
    }

    pub async fn job_timeout(&self) -> Result<Option<Duration>> {
        let ms = self.get_u64(ConfigKey::JobTimeoutMs).await?;
        Ok((ms > 0).then(|| Duration::from_millis(ms)))
    }

    /// Read all recognized settings at once.
    pub async fn settings(&self) -> Result<QueueSettings> {
        Ok(QueueSettings {
            max_retries: self.max_retries().await?,
            backoff_base: self.backoff_base().await?,
            poll_interval: self.poll_interval().await?,
            job_timeout: self.job_timeout().await?,
        })
    }
}

fn validate_value(key: ConfigKey, value: &str) -> Result<u64> {
    let trimmed = value.trim();
    let n = trimmed.parse::<u64>().map_err(|_| {
        Error::validation(format!(
            "Value for '{}' must be a non-negative integer, got '{}'",
            key, value
        ))
    })?;
    if key == ConfigKey::MaxRetries && u32::try_from(n).is_err() {
        return Err(Error::validation(format!(
            "Value for '{}' must be at most {}",
            key,
            u32::MAX
        )));
    }
    Ok(n)
}
