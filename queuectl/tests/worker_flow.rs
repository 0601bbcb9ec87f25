use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use queuectl::AppContext;
use queuectl::database::models::JobState;
use queuectl::queue::{
    CommandExecutor, CommandOutput, EnqueueRequest, ExecutionOutcome, JobDisposition,
};

/// Fails every command.
struct AlwaysFails;

#[async_trait]
impl CommandExecutor for AlwaysFails {
    async fn run(&self, _command: &str, _timeout: Option<Duration>) -> ExecutionOutcome {
        ExecutionOutcome::Failure {
            code: Some(1),
            message: "Exit code 1".to_string(),
            duration: Duration::from_millis(1),
            output: CommandOutput::default(),
        }
    }
}

async fn setup() -> (TempDir, AppContext) {
    let dir = TempDir::new().unwrap();
    let ctx = AppContext::connect(dir.path().join("queue.db"))
        .await
        .unwrap();
    (dir, ctx)
}

/// Make a requeued job eligible immediately instead of waiting out its backoff.
async fn expire_backoff(ctx: &AppContext, id: &str) {
    sqlx::query("UPDATE jobs SET available_at = 0 WHERE id = ?")
        .bind(id)
        .execute(&ctx.pool)
        .await
        .unwrap();
}

#[tokio::test]
async fn retry_bound_and_backoff_growth() {
    let (_dir, ctx) = setup().await;
    let id = ctx
        .queue
        .enqueue(EnqueueRequest::new("false").with_max_retries(2))
        .await
        .unwrap();
    let worker = ctx.worker("w1", Arc::new(AlwaysFails));

    for (attempt, delay_secs) in [(1u32, 2i64), (2, 4)] {
        let processed = worker.process_next().await.unwrap().unwrap();
        assert!(matches!(
            processed.disposition,
            JobDisposition::Retrying { attempts, .. } if attempts == attempt
        ));

        let job = ctx.queue.get(&id).await.unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.attempts, attempt);
        let offset = (job.available_at - job.updated_at).num_milliseconds();
        let expected = delay_secs * 1000;
        assert!(
            (expected - 250..=expected + 250).contains(&offset),
            "attempt {attempt}: backoff offset {offset}ms, expected ~{expected}ms"
        );

        expire_backoff(&ctx, &id).await;
    }

    let processed = worker.process_next().await.unwrap().unwrap();
    assert_eq!(processed.disposition, JobDisposition::Dead { attempts: 3 });

    let job = ctx.queue.get(&id).await.unwrap();
    assert_eq!(job.state, JobState::Dead);
    assert_eq!(job.attempts, 3);
    assert_eq!(job.last_error.as_deref(), Some("Exit code 1"));
    assert!(worker.process_next().await.unwrap().is_none());
}

#[tokio::test]
async fn backoff_uses_configured_base() {
    let (_dir, ctx) = setup().await;
    ctx.config.set("backoff_base", "3").await.unwrap();
    let id = ctx
        .queue
        .enqueue(EnqueueRequest::new("false"))
        .await
        .unwrap();

    let worker = ctx.worker("w1", Arc::new(AlwaysFails));
    worker.process_next().await.unwrap().unwrap();
    expire_backoff(&ctx, &id).await;
    worker.process_next().await.unwrap().unwrap();

    let job = ctx.queue.get(&id).await.unwrap();
    assert_eq!(job.attempts, 2);
    assert_eq!(job.max_retries, 3);
    let offset = (job.available_at - job.updated_at).num_milliseconds();
    assert!((8_750..=9_250).contains(&offset), "offset {offset}ms");
}

#[tokio::test]
async fn dead_job_can_be_retried_from_queue() {
    let (_dir, ctx) = setup().await;
    let id = ctx
        .queue
        .enqueue(EnqueueRequest::new("false").with_max_retries(0).with_id("dlq-me"))
        .await
        .unwrap();
    assert_eq!(id, "dlq-me");

    let worker = ctx.worker("w1", Arc::new(AlwaysFails));
    worker.process_next().await.unwrap().unwrap();

    let dead = ctx.queue.dead_letters(10).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].id, "dlq-me");

    assert!(ctx.queue.retry_dead("dlq-me").await.unwrap());
    assert!(!ctx.queue.retry_dead("dlq-me").await.unwrap());
    assert!(ctx.queue.dead_letters(10).await.unwrap().is_empty());
    assert_eq!(ctx.queue.get("dlq-me").await.unwrap().attempts, 0);
}

#[tokio::test]
async fn enqueue_resolves_defaults() {
    let (_dir, ctx) = setup().await;
    ctx.config.set("max_retries", "6").await.unwrap();

    let run_at = chrono::Utc::now() + chrono::TimeDelta::hours(1);
    let request = EnqueueRequest::new("echo later")
        .with_run_at(run_at)
        .with_priority(4);
    let id = ctx.queue.enqueue(request).await.unwrap();
    assert_eq!(id.len(), 12);

    let job = ctx.queue.get(&id).await.unwrap();
    assert_eq!(job.max_retries, 6);
    assert_eq!(job.priority, 4);
    assert_eq!(job.attempts, 0);
    assert_eq!(
        job.available_at.timestamp_millis(),
        run_at.timestamp_millis()
    );

    let err = ctx.queue.get("missing").await.unwrap_err();
    assert!(matches!(err, queuectl::Error::NotFound { .. }));
}

#[tokio::test]
async fn invalid_enqueue_persists_nothing() {
    let (_dir, ctx) = setup().await;
    for input in [r#"{"max_retries":1}"#, r#"{"command":""}"#, "nope"] {
        let err = EnqueueRequest::from_json(input).unwrap_err();
        assert!(err.is_validation());
    }
    let err = ctx.queue.enqueue(EnqueueRequest::new("")).await.unwrap_err();
    assert!(err.is_validation());

    ctx.queue
        .enqueue(EnqueueRequest::new("true").with_id("same"))
        .await
        .unwrap();
    let err = ctx
        .queue
        .enqueue(EnqueueRequest::new("true").with_id("same"))
        .await
        .unwrap_err();
    assert!(err.is_validation());

    assert_eq!(ctx.queue.stats().await.unwrap().total(), 1);
}

#[tokio::test]
async fn lenient_json_fields_are_stored() {
    let (_dir, ctx) = setup().await;
    let request =
        EnqueueRequest::from_json(r#"{"id":7,"command":"  ","priority":5.0,"max_retries":2.0}"#)
            .unwrap();
    let id = ctx.queue.enqueue(request).await.unwrap();
    assert_eq!(id, "7");

    let job = ctx.queue.get("7").await.unwrap();
    assert_eq!(job.command, "  ");
    assert_eq!(job.priority, 5);
    assert_eq!(job.max_retries, 2);
}

#[cfg(unix)]
#[tokio::test]
async fn shell_job_completes() {
    let (_dir, ctx) = setup().await;
    let id = ctx
        .queue
        .enqueue(EnqueueRequest::from_json(r#"{"command":"exit 0"}"#).unwrap())
        .await
        .unwrap();

    let processed = ctx.shell_worker("w1").process_next().await.unwrap().unwrap();
    assert_eq!(processed.job_id, id);
    assert_eq!(processed.disposition, JobDisposition::Completed);
    assert_eq!(ctx.queue.stats().await.unwrap().completed, 1);
}

#[cfg(unix)]
#[tokio::test]
async fn shell_job_without_retries_goes_dead() {
    let (_dir, ctx) = setup().await;
    let id = ctx
        .queue
        .enqueue(EnqueueRequest::from_json(r#"{"command":"exit 1","max_retries":0}"#).unwrap())
        .await
        .unwrap();

    let processed = ctx.shell_worker("w1").process_next().await.unwrap().unwrap();
    assert_eq!(processed.disposition, JobDisposition::Dead { attempts: 1 });

    let job = ctx.queue.get(&id).await.unwrap();
    assert_eq!(job.state, JobState::Dead);
    assert_eq!(job.attempts, 1);
    assert_eq!(job.last_error.as_deref(), Some("Exit code 1"));
}

#[cfg(unix)]
#[tokio::test]
async fn configured_timeout_fails_long_jobs() {
    let (_dir, ctx) = setup().await;
    ctx.config.set("job_timeout_ms", "100").await.unwrap();
    let id = ctx
        .queue
        .enqueue(EnqueueRequest::new("sleep 5").with_max_retries(0))
        .await
        .unwrap();

    ctx.shell_worker("w1").process_next().await.unwrap().unwrap();
    let job = ctx.queue.get(&id).await.unwrap();
    assert_eq!(job.state, JobState::Dead);
    assert_eq!(job.last_error.as_deref(), Some("Timed out after 100 ms"));
}
