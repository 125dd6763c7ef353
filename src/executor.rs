//! Executes one claimed job and records its outcome.
//!
//! The executor is the containment boundary around handler code: returned
//! errors, panics, and deadline overruns are all converted into a recorded
//! outcome, and the retry policy decides whether that outcome reschedules
//! the job or fails it for good. Nothing a handler does propagates past
//! here; the worker loop only ever sees bookkeeping errors from the store.

use std::{sync::Arc, time::Duration};

use jiff::SignedDuration;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::{
    config::Config,
    handler::HandlerRegistry,
    job::Job,
    queue::Queue,
    ready::Entry,
    retry::{Decision, RetryPolicy},
    store::{self, Outcome},
    timestamp::Timestamp,
};

/// Recorded failure reasons are capped at this many characters.
const ERROR_CAP: usize = 1_000;

/// Runs claimed jobs to completion.
#[derive(Clone)]
pub struct Executor {
    queue: Queue,
    registry: Arc<HandlerRegistry>,
    retry_policy: RetryPolicy,
    job_timeout: Duration,
}

impl Executor {
    /// Creates an executor over the given queue and registry.
    pub fn new(queue: Queue, registry: Arc<HandlerRegistry>, config: &Config) -> Self {
        Self {
            queue,
            registry,
            retry_policy: RetryPolicy::builder()
                .backoff_base(config.retry_backoff_base)
                .build(),
            job_timeout: config.job_timeout,
        }
    }

    /// Executes a claimed job and records its outcome.
    ///
    /// `interrupt` is the shutdown abort signal: when it fires mid-flight,
    /// the handler's work is dropped and the job is released back to the
    /// queue without spending the attempt.
    ///
    /// The returned error only ever reflects a failure to record the
    /// outcome; handler failures are part of the recorded outcome itself.
    #[instrument(
        skip(self, job, interrupt),
        fields(
            job.id = %job.id,
            job.job_type = %job.job_type,
            job.attempt = job.attempts,
            job.max_retries = job.max_retries,
        ),
        err
    )]
    pub async fn execute(&self, job: Job, interrupt: CancellationToken) -> store::Result {
        let Some(handler) = self.registry.get(&job.job_type) else {
            tracing::error!(job.job_type = %job.job_type, "no handler registered for job type");

            // Not a handler failure: the job could never have run, so it
            // fails terminally without spending its retries.
            let outcome = Outcome::Failure {
                error: format!("unknown job type: {}", job.job_type),
                next: Decision::Terminal,
            };
            return self
                .queue
                .store()
                .complete(job.id, &outcome, Timestamp::now())
                .await;
        };

        let deadline = Timestamp::now().saturating_add(
            SignedDuration::try_from(self.job_timeout).unwrap_or(SignedDuration::MAX),
        );

        // The handler runs on its own task so a panic is caught at the join
        // boundary rather than unwinding through the worker.
        let mut execution = tokio::spawn({
            let handler = Arc::clone(&handler);
            let payload = job.payload.clone();
            async move { handler.execute_json(payload, deadline).await }
        });

        let outcome = tokio::select! {
            result = tokio::time::timeout(self.job_timeout, &mut execution) => {
                match result {
                    Ok(Ok(Ok(result))) => Outcome::Success { result },

                    Ok(Ok(Err(err))) => self.failure(&job, err.to_string()),

                    Ok(Err(join_err)) => self.failure(&job, format!("handler panicked: {join_err}")),

                    Err(_) => {
                        execution.abort();
                        self.failure(
                            &job,
                            format!("timeout after {}s", self.job_timeout.as_secs()),
                        )
                    }
                }
            }

            _ = interrupt.cancelled() => {
                execution.abort();
                tracing::info!("shutdown interrupted execution, releasing job");

                let now = Timestamp::now();
                self.queue.store().release(job.id, now).await?;
                self.queue
                    .publish(Entry {
                        id: job.id,
                        priority: job.priority,
                        scheduled_at: now,
                    })
                    .await;

                return Ok(());
            }
        };

        let now = Timestamp::now();
        match &outcome {
            Outcome::Success { .. } => {
                tracing::info!("job succeeded");
            }
            Outcome::Failure {
                error,
                next: Decision::Retry { scheduled_at },
            } => {
                tracing::warn!(err = %error, retry_at = %scheduled_at, "job failed, will retry");
            }
            Outcome::Failure {
                error,
                next: Decision::Terminal,
            } => {
                tracing::error!(err = %error, "job failed permanently");
            }
        }

        self.queue.store().complete(job.id, &outcome, now).await?;

        if let Outcome::Failure {
            next: Decision::Retry { scheduled_at },
            ..
        } = outcome
        {
            self.queue
                .publish(Entry {
                    id: job.id,
                    priority: job.priority,
                    scheduled_at,
                })
                .await;
        }

        Ok(())
    }

    fn failure(&self, job: &Job, error: String) -> Outcome {
        let next = self
            .retry_policy
            .decide(job.attempts, job.max_retries, Timestamp::now());

        Outcome::Failure {
            error: cap_error(error),
            next,
        }
    }
}

fn cap_error(error: String) -> String {
    if error.chars().count() <= ERROR_CAP {
        error
    } else {
        error.chars().take(ERROR_CAP).collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};
    use sqlx::PgPool;

    use super::*;
    use crate::{
        handler::{self, Handler},
        job::{JobStatus, NewJob},
        store::Store,
    };

    struct Echo;

    impl Handler for Echo {
        const JOB_TYPE: &'static str = "echo";

        type Payload = Value;
        type Output = Value;

        async fn execute(&self, payload: Value, _deadline: Timestamp) -> handler::Result<Value> {
            Ok(json!({ "echo": payload }))
        }
    }

    struct AlwaysFails;

    impl Handler for AlwaysFails {
        const JOB_TYPE: &'static str = "always_fails";

        type Payload = Value;
        type Output = ();

        async fn execute(&self, _payload: Value, _deadline: Timestamp) -> handler::Result<()> {
            Err(handler::Error::new("synthetic failure"))
        }
    }

    struct Verbose;

    impl Handler for Verbose {
        const JOB_TYPE: &'static str = "verbose";

        type Payload = Value;
        type Output = ();

        async fn execute(&self, _payload: Value, _deadline: Timestamp) -> handler::Result<()> {
            Err(handler::Error::new("x".repeat(5_000)))
        }
    }

    struct Sleepy;

    impl Handler for Sleepy {
        const JOB_TYPE: &'static str = "sleepy";

        type Payload = Value;
        type Output = ();

        async fn execute(&self, _payload: Value, _deadline: Timestamp) -> handler::Result<()> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    struct Panicky;

    impl Handler for Panicky {
        const JOB_TYPE: &'static str = "panicky";

        type Payload = Value;
        type Output = ();

        async fn execute(&self, _payload: Value, _deadline: Timestamp) -> handler::Result<()> {
            panic!("unexpected");
        }
    }

    fn test_registry() -> Arc<HandlerRegistry> {
        let mut registry = HandlerRegistry::new();
        registry.register(Echo);
        registry.register(AlwaysFails);
        registry.register(Verbose);
        registry.register(Sleepy);
        registry.register(Panicky);
        Arc::new(registry)
    }

    fn test_executor(pool: PgPool, config: &Config) -> (Executor, Queue) {
        let queue = Queue::new(Store::new(pool), None, config.max_retries);
        let executor = Executor::new(queue.clone(), test_registry(), config);
        (executor, queue)
    }

    async fn claimed(queue: &Queue, new_job: NewJob) -> Job {
        let now = Timestamp::now();
        queue.submit(&new_job, now).await.unwrap();
        queue
            .next_job(now)
            .await
            .unwrap()
            .expect("job should be claimable")
    }

    #[sqlx::test]
    async fn success_records_the_result(pool: PgPool) -> store::Result {
        let (executor, queue) = test_executor(pool, &Config::default());
        let job = claimed(
            &queue,
            NewJob::new("echo", "echo").payload(json!({ "n": 1 })),
        )
        .await;
        let id = job.id;

        executor.execute(job, CancellationToken::new()).await?;

        let job = queue.store().fetch(id).await?;
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.result, Some(json!({ "echo": { "n": 1 } })));
        assert_eq!(job.attempts, 1);
        assert!(job.completed_at.is_some());

        Ok(())
    }

    #[sqlx::test]
    async fn failure_reschedules_with_backoff(pool: PgPool) -> store::Result {
        let (executor, queue) = test_executor(pool, &Config::default());
        let job = claimed(&queue, NewJob::new("fails", "always_fails")).await;
        let id = job.id;
        let claimed_at = job.started_at.unwrap();

        executor.execute(job, CancellationToken::new()).await?;

        let job = queue.store().fetch(id).await?;
        assert_eq!(job.status, JobStatus::Retrying);
        assert_eq!(job.error, Some("synthetic failure".to_string()));
        assert_eq!(job.attempts, 1);
        assert_eq!(job.completed_at, None);

        // First retry backs off by base^1 = 2 seconds.
        let delay = job.scheduled_at.0.duration_since(claimed_at.0);
        assert!(delay >= SignedDuration::from_secs(2));

        Ok(())
    }

    #[sqlx::test]
    async fn exhausted_retries_fail_terminally(pool: PgPool) -> store::Result {
        let (executor, queue) = test_executor(pool, &Config::default());
        let job = claimed(
            &queue,
            NewJob::new("fails", "always_fails").max_retries(0),
        )
        .await;
        let id = job.id;

        executor.execute(job, CancellationToken::new()).await?;

        let job = queue.store().fetch(id).await?;
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.completed_at.is_some());

        Ok(())
    }

    #[sqlx::test]
    async fn unknown_job_types_fail_terminally(pool: PgPool) -> store::Result {
        let (executor, queue) = test_executor(pool, &Config::default());
        // Plenty of retries left; an unregistered type must not spend them.
        let job = claimed(&queue, NewJob::new("mystery", "mystery").max_retries(5)).await;
        let id = job.id;

        executor.execute(job, CancellationToken::new()).await?;

        let job = queue.store().fetch(id).await?;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error, Some("unknown job type: mystery".to_string()));
        assert!(job.completed_at.is_some());

        Ok(())
    }

    #[sqlx::test]
    async fn timeouts_are_recorded_as_failures(pool: PgPool) -> store::Result {
        let config = Config::builder()
            .job_timeout(Duration::from_millis(50))
            .build();
        let (executor, queue) = test_executor(pool, &config);
        let job = claimed(&queue, NewJob::new("slow", "sleepy")).await;
        let id = job.id;

        executor.execute(job, CancellationToken::new()).await?;

        let job = queue.store().fetch(id).await?;
        assert_eq!(job.status, JobStatus::Retrying);
        assert!(job.error.unwrap().starts_with("timeout after"));

        Ok(())
    }

    #[sqlx::test]
    async fn handler_panics_are_contained(pool: PgPool) -> store::Result {
        let (executor, queue) = test_executor(pool, &Config::default());
        let job = claimed(&queue, NewJob::new("bad", "panicky")).await;
        let id = job.id;

        executor.execute(job, CancellationToken::new()).await?;

        let job = queue.store().fetch(id).await?;
        assert_eq!(job.status, JobStatus::Retrying);
        assert!(job.error.unwrap().starts_with("handler panicked"));

        Ok(())
    }

    #[sqlx::test]
    async fn failure_reasons_are_capped(pool: PgPool) -> store::Result {
        let (executor, queue) = test_executor(pool, &Config::default());
        let job = claimed(&queue, NewJob::new("noisy", "verbose")).await;
        let id = job.id;

        executor.execute(job, CancellationToken::new()).await?;

        let job = queue.store().fetch(id).await?;
        assert_eq!(job.error.unwrap().chars().count(), 1_000);

        Ok(())
    }

    #[sqlx::test]
    async fn interruption_releases_the_job(pool: PgPool) -> store::Result {
        let (executor, queue) = test_executor(pool, &Config::default());
        let job = claimed(&queue, NewJob::new("slow", "sleepy")).await;
        let id = job.id;

        let interrupt = CancellationToken::new();
        let execution = tokio::spawn({
            let executor = executor.clone();
            let interrupt = interrupt.clone();
            async move { executor.execute(job, interrupt).await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        interrupt.cancel();
        execution.await.expect("executor task should join")?;

        let job = queue.store().fetch(id).await?;
        assert_eq!(job.status, JobStatus::Retrying);
        // The interrupted attempt is returned, not spent.
        assert_eq!(job.attempts, 0);

        Ok(())
    }
}
