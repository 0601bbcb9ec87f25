//! Shared application handles.
//!
//! The AppContext owns the pool and the services built on it, plus the
//! cancellation token used to stop workers.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::Result;
use crate::config::ConfigService;
use crate::database::repositories::{
    ConfigRepository, JobRepository, SqlxConfigRepository, SqlxJobRepository,
};
use crate::database::{self, DbPool};
use crate::queue::{CommandExecutor, JobQueue, ShellExecutor, Worker};

/// Environment variable naming the database file.
pub const DB_PATH_ENV: &str = "QUEUECTL_DB";
/// Database file used when none is configured.
pub const DEFAULT_DB_PATH: &str = "queuectl.db";

pub struct AppContext {
    pub db_path: PathBuf,
    pub pool: DbPool,
    pub jobs: Arc<dyn JobRepository>,
    pub config: Arc<ConfigService>,
    pub queue: JobQueue,
    cancellation_token: CancellationToken,
}

impl AppContext {
    /// Open (creating if needed) the database, apply migrations and seed
    /// default configuration.
    pub async fn connect(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        let pool = database::init_pool(&database::database_url(&db_path)).await?;
        database::run_migrations(&pool).await?;

        let config_repo: Arc<dyn ConfigRepository> =
            Arc::new(SqlxConfigRepository::new(pool.clone()));
        let config = Arc::new(ConfigService::new(config_repo));
        config.seed_defaults().await?;

        let jobs: Arc<dyn JobRepository> = Arc::new(SqlxJobRepository::new(pool.clone()));
        let queue = JobQueue::new(jobs.clone(), config.clone());

        debug!(db = %db_path.display(), "Opened job store");
        Ok(Self {
            db_path,
            pool,
            jobs,
            config,
            queue,
            cancellation_token: CancellationToken::new(),
        })
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Worker running commands through the system shell.
    pub fn shell_worker(&self, worker_id: impl Into<String>) -> Worker {
        self.worker(worker_id, Arc::new(ShellExecutor::new()))
    }

    pub fn worker(
        &self,
        worker_id: impl Into<String>,
        executor: Arc<dyn CommandExecutor>,
    ) -> Worker {
        Worker::new(
            worker_id,
            self.jobs.clone(),
            self.config.clone(),
            executor,
            self.cancellation_token.clone(),
        )
    }

    /// Stop workers built from this context and close the pool.
    pub async fn close(&self) {
        self.cancellation_token.cancel();
        self.pool.close().await;
    }
}
