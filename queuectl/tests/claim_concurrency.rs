use dashmap::DashSet;
use rand::random;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinSet;

use queuectl::database::models::JobDbModel;
use queuectl::database::repositories::{JobRepository, SqlxJobRepository};
use queuectl::database::{DbPool, database_url, init_pool, run_migrations};

async fn init_stress_pool(database_url: &str) -> DbPool {
    let connect_options = SqliteConnectOptions::from_str(database_url)
        .unwrap()
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        // Make SQLITE_BUSY surface quickly so retry logic is exercised.
        .busy_timeout(Duration::from_millis(1))
        .create_if_missing(true);

    SqlitePoolOptions::new()
        .max_connections(32)
        .acquire_timeout(Duration::from_secs(30))
        .connect_with(connect_options)
        .await
        .unwrap()
}

async fn seed(repo: &SqlxJobRepository, jobs: usize) {
    for i in 0..jobs {
        let priority = ((i % 5) as i64) - 2;
        repo.create_job(&JobDbModel::new_pending(
            format!("job-{i}"),
            "true",
            3,
            priority,
            None,
        ))
        .await
        .unwrap();
    }
}

/// Claim and complete until the queue is empty, recording every claim.
async fn drain(repo: Arc<SqlxJobRepository>, worker_id: String, claimed: Arc<DashSet<String>>) {
    loop {
        match repo.claim_next_job(&worker_id).await.unwrap() {
            Some(job) => {
                assert_eq!(job.locked_by.as_deref(), Some(worker_id.as_str()));
                let inserted = claimed.insert(job.id.clone());
                assert!(inserted, "double-claimed job {}", job.id);

                // Widen the window between claim and completion.
                if random::<u8>() % 3 == 0 {
                    tokio::task::yield_now().await;
                } else {
                    tokio::time::sleep(Duration::from_millis(random::<u64>() % 3)).await;
                }

                repo.complete(&job.id).await.unwrap();
            }
            None => {
                // A lost race also yields None, so only stop once nothing is pending.
                if repo.counts_by_state().await.unwrap().pending == 0 {
                    break;
                }
                tokio::task::yield_now().await;
            }
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_workers_claim_each_job_once() {
    const JOBS: usize = 60;
    const WORKERS_PER_POOL: usize = 4;

    let dir = TempDir::new().unwrap();
    let url = database_url(dir.path().join("claims.db"));

    // Two pools on one file stand in for two worker processes.
    let first = init_pool(&url).await.unwrap();
    run_migrations(&first).await.unwrap();
    let second = init_pool(&url).await.unwrap();

    let repos = [
        Arc::new(SqlxJobRepository::new(first)),
        Arc::new(SqlxJobRepository::new(second)),
    ];
    seed(&repos[0], JOBS).await;

    let claimed = Arc::new(DashSet::<String>::new());
    let mut workers = JoinSet::new();
    for (p, repo) in repos.iter().enumerate() {
        for w in 0..WORKERS_PER_POOL {
            workers.spawn(drain(
                repo.clone(),
                format!("worker-{p}-{w}"),
                claimed.clone(),
            ));
        }
    }

    let joined = tokio::time::timeout(Duration::from_secs(60), async {
        while let Some(result) = workers.join_next().await {
            result.unwrap();
        }
    })
    .await;
    assert!(joined.is_ok(), "workers timed out");

    assert_eq!(claimed.len(), JOBS, "not all jobs were claimed");
    let counts = repos[0].counts_by_state().await.unwrap();
    assert_eq!(counts.pending, 0);
    assert_eq!(counts.processing, 0);
    assert_eq!(counts.completed, JOBS as u64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
#[ignore = "stress test; run explicitly to validate SQLite claim correctness under contention"]
async fn sqlite_claim_stress_no_double_claims_or_lost_transitions() {
    const JOBS: usize = 300;
    const WORKERS: usize = 24;

    let dir = TempDir::new().unwrap();
    let pool = init_stress_pool(&database_url(dir.path().join("stress.db"))).await;
    run_migrations(&pool).await.unwrap();

    let repo = Arc::new(SqlxJobRepository::new(pool.clone()));
    seed(&repo, JOBS).await;

    // Background writer that periodically holds the write lock briefly to force SQLITE_BUSY.
    let locker_pool = pool.clone();
    let locker = tokio::spawn(async move {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while tokio::time::Instant::now() < deadline {
            if let Ok(mut tx) = locker_pool.begin().await {
                let _ = sqlx::query(
                    "UPDATE jobs SET updated_at = updated_at WHERE id IN (SELECT id FROM jobs LIMIT 1)",
                )
                .execute(&mut *tx)
                .await;
                tokio::time::sleep(Duration::from_millis(5)).await;
                let _ = tx.commit().await;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    });

    let claimed = Arc::new(DashSet::<String>::new());
    let mut workers = JoinSet::new();
    for w in 0..WORKERS {
        workers.spawn(drain(repo.clone(), format!("worker-{w}"), claimed.clone()));
    }

    let joined = tokio::time::timeout(Duration::from_secs(30), async {
        while workers.join_next().await.is_some() {}
    })
    .await;
    assert!(joined.is_ok(), "workers timed out (possible deadlock)");

    let _ = locker.await;

    assert_eq!(claimed.len(), JOBS, "not all jobs were claimed");
    let counts = repo.counts_by_state().await.unwrap();
    assert_eq!(counts.pending, 0, "pending jobs remain");
    assert_eq!(counts.processing, 0, "processing jobs remain");
    assert_eq!(counts.completed, JOBS as u64, "not all jobs completed");

    let unlocked: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM jobs WHERE locked_by IS NOT NULL OR locked_at IS NOT NULL",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(unlocked, 0, "completed jobs still hold a lease");
}
