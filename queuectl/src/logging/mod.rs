//! Logging setup.
//!
//! CLI commands log to stderr only, leaving stdout for command output.
//! `worker run` additionally writes a daily-rotated `worker.log` in the log
//! directory, and prunes rotated files older than a week on startup.

use chrono::{Local, NaiveDate, Utc};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "queuectl=info,process_utils=info,sqlx=warn";

/// Environment variable naming the worker log directory.
pub const LOG_DIR_ENV: &str = "QUEUECTL_LOG_DIR";

/// Worker log file prefix; the appender adds `.YYYY-MM-DD`.
const WORKER_LOG_FILE: &str = "worker.log";

/// Log retention period in days.
const LOG_RETENTION_DAYS: i64 = 7;

/// Custom timer that uses the local timezone via chrono.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Where log output goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    /// Short-lived CLI command: stderr only.
    Console,
    /// Long-running worker: stderr plus a rotated file in `log_dir`.
    Worker { log_dir: PathBuf },
}

/// Log directory from `QUEUECTL_LOG_DIR`, or `logs` next to the database.
pub fn default_log_dir(db_path: &Path) -> PathBuf {
    if let Ok(dir) = std::env::var(LOG_DIR_ENV) {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    db_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| p.join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"))
}

/// Install the global subscriber.
///
/// Keep the returned guard alive for the life of the process, or buffered
/// file output is lost.
pub fn init_logging(target: &LogTarget) -> crate::Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_timer(LocalTimer);

    match target {
        LogTarget::Console => {
            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .try_init()
                .map_err(|e| {
                    crate::Error::Other(format!("Failed to set global default subscriber: {}", e))
                })?;
            Ok(None)
        }
        LogTarget::Worker { log_dir } => {
            std::fs::create_dir_all(log_dir)?;

            let file_appender = tracing_appender::rolling::daily(log_dir, WORKER_LOG_FILE);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .with(
                    fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_timer(LocalTimer),
                )
                .try_init()
                .map_err(|e| {
                    crate::Error::Other(format!("Failed to set global default subscriber: {}", e))
                })?;
            Ok(Some(guard))
        }
    }
}

/// Date suffix of a rotated worker log file name.
fn rotated_log_date(file_name: &str) -> Option<NaiveDate> {
    let date = file_name.strip_prefix(WORKER_LOG_FILE)?.strip_prefix('.')?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

/// Delete rotated worker logs older than the retention period.
///
/// Returns how many files were removed.
pub async fn cleanup_old_logs(log_dir: &Path) -> std::io::Result<usize> {
    let cutoff = (Utc::now() - chrono::Duration::days(LOG_RETENTION_DAYS)).date_naive();

    let mut entries = tokio::fs::read_dir(log_dir).await?;
    let mut deleted_count = 0;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let Some(file_date) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(rotated_log_date)
        else {
            continue;
        };

        if file_date < cutoff {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    deleted_count += 1;
                    debug!(path = %path.display(), "Deleted old log file");
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to delete old log file")
                }
            }
        }
    }

    if deleted_count > 0 {
        info!(count = deleted_count, "Cleaned up old log files");
    }

    Ok(deleted_count)
}
