//! Configuration repository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use strum::IntoEnumIterator;

use crate::Result;
use crate::database::models::{ConfigEntryDbModel, ConfigKey};

/// Configuration repository trait.
#[async_trait]
pub trait ConfigRepository: Send + Sync {
    async fn get_value(&self, key: &str) -> Result<Option<String>>;
    async fn set_value(&self, key: &str, value: &str) -> Result<()>;
    async fn list_values(&self) -> Result<Vec<ConfigEntryDbModel>>;
    /// Insert defaults for seeded keys that have no value yet.
    async fn seed_defaults(&self) -> Result<()>;
}

/// SQLx implementation of ConfigRepository.
pub struct SqlxConfigRepository {
    pool: SqlitePool,
}

impl SqlxConfigRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConfigRepository for SqlxConfigRepository {
    async fn get_value(&self, key: &str) -> Result<Option<String>> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM config WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn set_value(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO config (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_values(&self) -> Result<Vec<ConfigEntryDbModel>> {
        let rows = sqlx::query_as::<_, ConfigEntryDbModel>(
            "SELECT key, value FROM config ORDER BY key",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn seed_defaults(&self) -> Result<()> {
        for key in ConfigKey::iter().filter(ConfigKey::is_seeded) {
            sqlx::query("INSERT INTO config (key, value) VALUES (?, ?) ON CONFLICT(key) DO NOTHING")
                .bind(key.as_str())
                .bind(key.default_value().to_string())
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }
}
