//! The durable tier: authoritative job persistence over Postgres.
//!
//! Every job lives as a row in `taskmill.jobs`. The store owns all state
//! transitions, and its [`claim_one`](Store::claim_one) operation is the
//! engine's single hard serialization point: a `for update skip locked` scan
//! feeding an `update … returning` in one statement, so any number of
//! concurrent claimants receive distinct rows without blocking one another.
//!
//! Everything else here is ordinary row bookkeeping: inserts, lookups,
//! outcome recording, and the two operator commands (cancel and retry).

use serde_json::Value;
use sqlx::{PgExecutor, PgPool, QueryBuilder};
use tracing::instrument;

use crate::{
    job::{Job, JobFilter, JobId, JobStatus, NewJob},
    ready::Entry,
    retry::Decision,
    stats::StatusCounts,
    timestamp::Timestamp,
};

/// A type alias for store results.
pub type Result<T = ()> = std::result::Result<T, Error>;

/// Hard bound on rows per batch insert.
pub const BULK_INSERT_BOUND: usize = 100;

/// Store errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Error returned by the `sqlx` crate during database operations.
    #[error(transparent)]
    Database(#[from] sqlx::Error),

    /// Indicates that the job couldn't be found.
    #[error("job {0} not found")]
    NotFound(JobId),

    /// The job is not in a state the requested transition accepts.
    #[error("job {id} is {status}; expected {expected}")]
    InvalidTransition {
        /// The job whose transition was rejected.
        id: JobId,
        /// Status the job was found in.
        status: JobStatus,
        /// States the transition accepts.
        expected: &'static str,
    },

    /// A batch insert exceeded [`BULK_INSERT_BOUND`].
    #[error("batch of {0} rows exceeds the insert bound of {BULK_INSERT_BOUND}")]
    BatchTooLarge(usize),
}

/// How a finished execution is recorded.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The handler succeeded.
    Success {
        /// Handler output, stored on the row.
        result: Value,
    },

    /// The handler failed; `next` carries the retry decision.
    Failure {
        /// Failure reason, stored on the row.
        error: String,
        /// Whether the job reschedules or fails terminally.
        next: Decision,
    },
}

/// Authoritative job storage.
#[derive(Debug, Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    /// Creates a store over the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Inserts a single job, returning its assigned ID.
    ///
    /// Unset optional submission fields resolve against `default_max_retries`
    /// and `now`.
    #[instrument(skip(self, job), fields(job.job_type = %job.job_type), err)]
    pub async fn insert(
        &self,
        job: &NewJob,
        default_max_retries: i32,
        now: Timestamp,
    ) -> Result<JobId> {
        insert_one(&self.pool, job, default_max_retries, now).await
    }

    /// Atomically inserts a batch of jobs, returning their assigned IDs.
    ///
    /// All-or-nothing: if any row is rejected, no rows are written. Bounded
    /// at [`BULK_INSERT_BOUND`] rows per call.
    #[instrument(skip(self, jobs), fields(batch.len = jobs.len()), err)]
    pub async fn insert_many(
        &self,
        jobs: &[NewJob],
        default_max_retries: i32,
        now: Timestamp,
    ) -> Result<Vec<JobId>> {
        if jobs.len() > BULK_INSERT_BOUND {
            return Err(Error::BatchTooLarge(jobs.len()));
        }

        let mut tx = self.pool.begin().await?;

        let mut ids = Vec::with_capacity(jobs.len());
        for job in jobs {
            ids.push(insert_one(&mut *tx, job, default_max_retries, now).await?);
        }

        tx.commit().await?;

        Ok(ids)
    }

    /// Fetches a job by ID.
    pub async fn fetch(&self, id: JobId) -> Result<Job> {
        let job = sqlx::query_as::<_, Job>("select * from taskmill.jobs where id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        job.ok_or(Error::NotFound(id))
    }

    /// Lists jobs matching the filter, newest first.
    #[instrument(skip(self, filter), err)]
    pub async fn list(&self, filter: &JobFilter, limit: i64, offset: i64) -> Result<Vec<Job>> {
        let mut query = QueryBuilder::new("select * from taskmill.jobs where true");

        if let Some(status) = filter.status {
            query.push(" and status = ").push_bind(status);
        }
        if let Some(job_type) = &filter.job_type {
            query.push(" and job_type = ").push_bind(job_type.clone());
        }

        query
            .push(" order by created_at desc, id desc limit ")
            .push_bind(limit)
            .push(" offset ")
            .push_bind(offset);

        Ok(query.build_query_as::<Job>().fetch_all(&self.pool).await?)
    }

    /// Claims the next eligible job, if any.
    ///
    /// Selects the eligible row with the highest priority (ties broken by
    /// earliest `scheduled_at`, then lowest ID), skipping rows locked by
    /// concurrent claimants, and transitions it to `running` in the same
    /// statement. Returns `None` when nothing is eligible.
    #[instrument(skip(self), err)]
    pub async fn claim_one(&self, now: Timestamp) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(
            r#"
            with next_job as (
                select id
                from taskmill.jobs
                where status in ('pending', 'retrying')
                  and scheduled_at <= $1
                order by priority desc, scheduled_at, id
                limit 1
                for update skip locked
            )
            update taskmill.jobs as j
            set status = 'running',
                started_at = $1,
                attempts = attempts + 1
            from next_job
            where j.id = next_job.id
            returning j.*
            "#,
        )
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    /// Claims a specific job if it is still eligible.
    ///
    /// The focused variant of [`claim_one`](Store::claim_one), used after a
    /// fast-tier pop. Returns `None` when the row is gone, locked, already
    /// taken, cancelled, or not yet due.
    #[instrument(skip(self), fields(job.id = %id), err)]
    pub async fn claim_one_by_id(&self, id: JobId, now: Timestamp) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(
            r#"
            with next_job as (
                select id
                from taskmill.jobs
                where id = $2
                  and status in ('pending', 'retrying')
                  and scheduled_at <= $1
                for update skip locked
            )
            update taskmill.jobs as j
            set status = 'running',
                started_at = $1,
                attempts = attempts + 1
            from next_job
            where j.id = next_job.id
            returning j.*
            "#,
        )
        .bind(now)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    /// Records the outcome of a finished execution.
    ///
    /// Success and terminal failure both close the row with `completed_at`;
    /// a rescheduled failure moves it back to `retrying` with its new
    /// eligibility instant and leaves `completed_at` unset.
    #[instrument(skip(self, outcome), fields(job.id = %id), err)]
    pub async fn complete(&self, id: JobId, outcome: &Outcome, now: Timestamp) -> Result {
        let result = match outcome {
            Outcome::Success { result } => {
                sqlx::query(
                    r#"
                    update taskmill.jobs
                    set status = 'succeeded',
                        result = $2,
                        error = null,
                        completed_at = $3
                    where id = $1 and status = 'running'
                    "#,
                )
                .bind(id)
                .bind(non_null(result))
                .bind(now)
                .execute(&self.pool)
                .await?
            }

            Outcome::Failure {
                error,
                next: Decision::Retry { scheduled_at },
            } => {
                sqlx::query(
                    r#"
                    update taskmill.jobs
                    set status = 'retrying',
                        error = $2,
                        scheduled_at = $3
                    where id = $1 and status = 'running'
                    "#,
                )
                .bind(id)
                .bind(error)
                .bind(*scheduled_at)
                .execute(&self.pool)
                .await?
            }

            Outcome::Failure {
                error,
                next: Decision::Terminal,
            } => {
                sqlx::query(
                    r#"
                    update taskmill.jobs
                    set status = 'failed',
                        error = $2,
                        completed_at = $3
                    where id = $1 and status = 'running'
                    "#,
                )
                .bind(id)
                .bind(error)
                .bind(now)
                .execute(&self.pool)
                .await?
            }
        };

        if result.rows_affected() == 0 {
            return Err(self.transition_conflict(id, "running").await);
        }

        Ok(())
    }

    /// Cancels a job that has not started running.
    #[instrument(skip(self), fields(job.id = %id), err)]
    pub async fn cancel(&self, id: JobId, now: Timestamp) -> Result<Job> {
        let job = sqlx::query_as::<_, Job>(
            r#"
            update taskmill.jobs
            set status = 'cancelled',
                completed_at = $2
            where id = $1 and status in ('pending', 'retrying')
            returning *
            "#,
        )
        .bind(id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        match job {
            Some(job) => Ok(job),
            None => Err(self.transition_conflict(id, "pending or retrying").await),
        }
    }

    /// Returns a terminally failed or cancelled job to the queue.
    ///
    /// Clears the prior outcome and makes the job eligible immediately. The
    /// attempt counter is left as it stands.
    #[instrument(skip(self), fields(job.id = %id), err)]
    pub async fn reset_for_retry(&self, id: JobId, now: Timestamp) -> Result<Job> {
        let job = sqlx::query_as::<_, Job>(
            r#"
            update taskmill.jobs
            set status = 'pending',
                error = null,
                result = null,
                scheduled_at = $2,
                completed_at = null
            where id = $1 and status in ('failed', 'cancelled')
            returning *
            "#,
        )
        .bind(id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        match job {
            Some(job) => Ok(job),
            None => Err(self.transition_conflict(id, "failed or cancelled").await),
        }
    }

    /// Returns an interrupted execution to the queue.
    ///
    /// Used when shutdown cancels an in-flight job: the row goes back to
    /// `retrying`, eligible immediately, and the interrupted attempt is not
    /// counted against the job's retry cap.
    #[instrument(skip(self), fields(job.id = %id), err)]
    pub async fn release(&self, id: JobId, now: Timestamp) -> Result {
        let result = sqlx::query(
            r#"
            update taskmill.jobs
            set status = 'retrying',
                attempts = greatest(attempts - 1, 0),
                scheduled_at = $2
            where id = $1 and status = 'running'
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.transition_conflict(id, "running").await);
        }

        Ok(())
    }

    /// Aggregates job counts by status.
    pub async fn counts_by_status(&self) -> Result<StatusCounts> {
        let rows = sqlx::query_as::<_, (JobStatus, i64)>(
            "select status, count(*) from taskmill.jobs group by status",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            counts.set(status, count);
        }

        Ok(counts)
    }

    /// Counts rows currently eligible for claiming.
    pub async fn ready_count(&self, now: Timestamp) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            select count(*) from taskmill.jobs
            where status in ('pending', 'retrying') and scheduled_at <= $1
            "#,
        )
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Returns index entries for every row awaiting dispatch.
    ///
    /// Feeds the periodic fast-tier reconciliation; includes rows scheduled
    /// in the future, which the fast tier holds until due.
    pub async fn queued_entries(&self, limit: i64) -> Result<Vec<Entry>> {
        let entries = sqlx::query_as::<_, Entry>(
            r#"
            select id, priority, scheduled_at from taskmill.jobs
            where status in ('pending', 'retrying')
            order by scheduled_at
            limit $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    /// Builds the error for a transition whose guard matched no row.
    async fn transition_conflict(&self, id: JobId, expected: &'static str) -> Error {
        match self.fetch(id).await {
            Ok(job) => Error::InvalidTransition {
                id,
                status: job.status,
                expected,
            },
            Err(err) => err,
        }
    }
}

async fn insert_one<'a, E>(
    executor: E,
    job: &NewJob,
    default_max_retries: i32,
    now: Timestamp,
) -> Result<JobId>
where
    E: PgExecutor<'a>,
{
    let id = JobId::new();
    let max_retries = job.max_retries.unwrap_or(default_max_retries);
    let scheduled_at = job.scheduled_at.unwrap_or(now);

    sqlx::query(
        r#"
        insert into taskmill.jobs (
            id, name, job_type, priority, payload, status, attempts,
            max_retries, scheduled_at, created_at, owner_id
        ) values ($1, $2, $3, $4, $5, 'pending', 0, $6, $7, $8, $9)
        "#,
    )
    .bind(id)
    .bind(&job.name)
    .bind(&job.job_type)
    .bind(job.priority)
    .bind(&job.payload)
    .bind(max_retries)
    .bind(scheduled_at)
    .bind(now)
    .bind(&job.owner_id)
    .execute(executor)
    .await?;

    Ok(id)
}

fn non_null(value: &Value) -> Option<&Value> {
    (!value.is_null()).then_some(value)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use jiff::SignedDuration;
    use serde_json::json;
    use sqlx::PgPool;

    use super::*;

    fn plus(now: Timestamp, seconds: i64) -> Timestamp {
        now.saturating_add(SignedDuration::from_secs(seconds))
    }

    #[sqlx::test]
    async fn insert_and_fetch_roundtrip(pool: PgPool) -> Result {
        let store = Store::new(pool);
        let now = Timestamp::now();

        let new_job = NewJob::new("welcome email", "email")
            .priority(7)
            .payload(json!({ "to": "ferris@example.com" }))
            .owner("alice");
        let id = store.insert(&new_job, 5, now).await?;

        let job = store.fetch(id).await?;
        assert_eq!(job.id, id);
        assert_eq!(job.name, "welcome email");
        assert_eq!(job.job_type, "email");
        assert_eq!(job.priority, 7);
        assert_eq!(job.payload, json!({ "to": "ferris@example.com" }));
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.max_retries, 5);
        assert_eq!(job.scheduled_at, now);
        assert_eq!(job.created_at, now);
        assert_eq!(job.started_at, None);
        assert_eq!(job.completed_at, None);
        assert_eq!(job.result, None);
        assert_eq!(job.error, None);
        assert_eq!(job.owner_id, Some("alice".to_string()));

        Ok(())
    }

    #[sqlx::test]
    async fn fetch_unknown_job_is_not_found(pool: PgPool) -> Result {
        let store = Store::new(pool);

        let result = store.fetch(JobId::new()).await;
        assert!(matches!(result, Err(Error::NotFound(_))));

        Ok(())
    }

    #[sqlx::test]
    async fn claim_prefers_higher_priority(pool: PgPool) -> Result {
        let store = Store::new(pool);
        let now = Timestamp::now();

        let a = store
            .insert(&NewJob::new("a", "noop").priority(5), 5, now)
            .await?;
        let b = store
            .insert(&NewJob::new("b", "noop").priority(10), 5, now)
            .await?;

        let first = store.claim_one(now).await?.expect("b should be claimable");
        assert_eq!(first.id, b);

        let second = store.claim_one(now).await?.expect("a should be claimable");
        assert_eq!(second.id, a);

        assert!(store.claim_one(now).await?.is_none());

        Ok(())
    }

    #[sqlx::test]
    async fn claim_ignores_jobs_scheduled_in_the_future(pool: PgPool) -> Result {
        let store = Store::new(pool);
        let now = Timestamp::now();

        let id = store
            .insert(
                &NewJob::new("later", "noop").scheduled_at(plus(now, 2)),
                5,
                now,
            )
            .await?;

        assert!(store.claim_one(plus(now, 1)).await?.is_none());

        let claimed = store
            .claim_one(plus(now, 3))
            .await?
            .expect("job should be due");
        assert_eq!(claimed.id, id);

        Ok(())
    }

    #[sqlx::test]
    async fn claim_ties_break_by_schedule_then_id(pool: PgPool) -> Result {
        let store = Store::new(pool);
        let now = Timestamp::now();

        let later = store
            .insert(&NewJob::new("later", "noop").scheduled_at(now), 5, now)
            .await?;
        let earlier = store
            .insert(
                &NewJob::new("earlier", "noop").scheduled_at(plus(now, -10)),
                5,
                now,
            )
            .await?;

        assert_eq!(store.claim_one(now).await?.unwrap().id, earlier);
        assert_eq!(store.claim_one(now).await?.unwrap().id, later);

        // Identical priority and schedule fall back to lowest ID.
        let first = store
            .insert(&NewJob::new("first", "noop").scheduled_at(now), 5, now)
            .await?;
        let second = store
            .insert(&NewJob::new("second", "noop").scheduled_at(now), 5, now)
            .await?;
        let (lower, higher) = if first < second {
            (first, second)
        } else {
            (second, first)
        };

        assert_eq!(store.claim_one(now).await?.unwrap().id, lower);
        assert_eq!(store.claim_one(now).await?.unwrap().id, higher);

        Ok(())
    }

    #[sqlx::test]
    async fn claim_records_the_attempt(pool: PgPool) -> Result {
        let store = Store::new(pool);
        let now = Timestamp::now();

        store.insert(&NewJob::new("work", "noop"), 5, now).await?;

        let claimed = store.claim_one(now).await?.unwrap();
        assert_eq!(claimed.status, JobStatus::Running);
        assert_eq!(claimed.attempts, 1);
        assert_eq!(claimed.started_at, Some(now));

        Ok(())
    }

    #[sqlx::test]
    async fn concurrent_claims_return_distinct_jobs(
        pool: PgPool,
    ) -> std::result::Result<(), Box<dyn std::error::Error>> {
        let store = Store::new(pool);
        let now = Timestamp::now();

        let mut expected = HashSet::new();
        for n in 0..5 {
            let id = store
                .insert(&NewJob::new(format!("job-{n}"), "noop"), 5, now)
                .await?;
            expected.insert(id);
        }

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.claim_one(now).await })
            })
            .collect();

        let results: Vec<Option<Job>> = futures::future::try_join_all(handles)
            .await?
            .into_iter()
            .collect::<Result<Vec<_>>>()?;

        let mut claimed = HashSet::new();
        for job in results.into_iter().flatten() {
            assert!(claimed.insert(job.id), "job claimed twice");
        }
        assert_eq!(claimed, expected);

        Ok(())
    }

    #[sqlx::test]
    async fn claim_by_id_misses_ineligible_rows(pool: PgPool) -> Result {
        let store = Store::new(pool);
        let now = Timestamp::now();

        let id = store.insert(&NewJob::new("work", "noop"), 5, now).await?;

        let claimed = store
            .claim_one_by_id(id, now)
            .await?
            .expect("pending job should be claimable by id");
        assert_eq!(claimed.id, id);

        // Already running: the focused claim comes up empty.
        assert!(store.claim_one_by_id(id, now).await?.is_none());

        // Unknown id behaves the same.
        assert!(store.claim_one_by_id(JobId::new(), now).await?.is_none());

        Ok(())
    }

    #[sqlx::test]
    async fn complete_success_closes_the_row(pool: PgPool) -> Result {
        let store = Store::new(pool);
        let now = Timestamp::now();

        let id = store.insert(&NewJob::new("work", "noop"), 5, now).await?;
        store.claim_one(now).await?.unwrap();

        let done = plus(now, 1);
        store
            .complete(
                id,
                &Outcome::Success {
                    result: json!({ "rows": 10 }),
                },
                done,
            )
            .await?;

        let job = store.fetch(id).await?;
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.result, Some(json!({ "rows": 10 })));
        assert_eq!(job.completed_at, Some(done));
        assert_eq!(job.error, None);

        Ok(())
    }

    #[sqlx::test]
    async fn complete_retry_reschedules_the_row(pool: PgPool) -> Result {
        let store = Store::new(pool);
        let now = Timestamp::now();

        let id = store.insert(&NewJob::new("work", "noop"), 5, now).await?;
        store.claim_one(now).await?.unwrap();

        let next = plus(now, 4);
        store
            .complete(
                id,
                &Outcome::Failure {
                    error: "connection refused".to_string(),
                    next: Decision::Retry { scheduled_at: next },
                },
                plus(now, 1),
            )
            .await?;

        let job = store.fetch(id).await?;
        assert_eq!(job.status, JobStatus::Retrying);
        assert_eq!(job.error, Some("connection refused".to_string()));
        assert_eq!(job.scheduled_at, next);
        assert_eq!(job.completed_at, None);

        // Due again once its backoff elapses.
        assert!(store.claim_one(now).await?.is_none());
        assert_eq!(store.claim_one(next).await?.unwrap().id, id);

        Ok(())
    }

    #[sqlx::test]
    async fn complete_terminal_failure_closes_the_row(pool: PgPool) -> Result {
        let store = Store::new(pool);
        let now = Timestamp::now();

        let id = store.insert(&NewJob::new("work", "noop"), 5, now).await?;
        store.claim_one(now).await?.unwrap();

        let done = plus(now, 1);
        store
            .complete(
                id,
                &Outcome::Failure {
                    error: "boom".to_string(),
                    next: Decision::Terminal,
                },
                done,
            )
            .await?;

        let job = store.fetch(id).await?;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error, Some("boom".to_string()));
        assert_eq!(job.completed_at, Some(done));

        Ok(())
    }

    #[sqlx::test]
    async fn complete_requires_a_running_row(pool: PgPool) -> Result {
        let store = Store::new(pool);
        let now = Timestamp::now();

        let id = store.insert(&NewJob::new("work", "noop"), 5, now).await?;

        let result = store
            .complete(
                id,
                &Outcome::Success {
                    result: Value::Null,
                },
                now,
            )
            .await;

        assert!(matches!(
            result,
            Err(Error::InvalidTransition {
                status: JobStatus::Pending,
                expected: "running",
                ..
            })
        ));

        Ok(())
    }

    #[sqlx::test]
    async fn cancel_is_limited_to_unstarted_jobs(pool: PgPool) -> Result {
        let store = Store::new(pool);
        let now = Timestamp::now();

        let id = store.insert(&NewJob::new("work", "noop"), 5, now).await?;

        let cancelled = store.cancel(id, now).await?;
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        assert_eq!(cancelled.completed_at, Some(now));

        // Cancelled rows are invisible to the claim scan.
        assert!(store.claim_one(now).await?.is_none());

        // Terminal states reject a second cancel.
        assert!(matches!(
            store.cancel(id, now).await,
            Err(Error::InvalidTransition {
                status: JobStatus::Cancelled,
                ..
            })
        ));

        let running = store.insert(&NewJob::new("busy", "noop"), 5, now).await?;
        store.claim_one(now).await?.unwrap();
        assert!(matches!(
            store.cancel(running, now).await,
            Err(Error::InvalidTransition {
                status: JobStatus::Running,
                ..
            })
        ));

        assert!(matches!(
            store.cancel(JobId::new(), now).await,
            Err(Error::NotFound(_))
        ));

        Ok(())
    }

    #[sqlx::test]
    async fn reset_for_retry_requeues_terminal_failures(pool: PgPool) -> Result {
        let store = Store::new(pool);
        let now = Timestamp::now();

        let id = store.insert(&NewJob::new("work", "noop"), 5, now).await?;
        store.claim_one(now).await?.unwrap();
        store
            .complete(
                id,
                &Outcome::Failure {
                    error: "boom".to_string(),
                    next: Decision::Terminal,
                },
                now,
            )
            .await?;

        let later = plus(now, 60);
        let job = store.reset_for_retry(id, later).await?;
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.error, None);
        assert_eq!(job.completed_at, None);
        assert_eq!(job.scheduled_at, later);
        // The attempt already spent stays on the record.
        assert_eq!(job.attempts, 1);

        assert_eq!(store.claim_one(later).await?.unwrap().id, id);

        Ok(())
    }

    #[sqlx::test]
    async fn reset_for_retry_rejects_successful_jobs(pool: PgPool) -> Result {
        let store = Store::new(pool);
        let now = Timestamp::now();

        let id = store.insert(&NewJob::new("work", "noop"), 5, now).await?;
        store.claim_one(now).await?.unwrap();
        store
            .complete(
                id,
                &Outcome::Success {
                    result: Value::Null,
                },
                now,
            )
            .await?;

        assert!(matches!(
            store.reset_for_retry(id, now).await,
            Err(Error::InvalidTransition {
                status: JobStatus::Succeeded,
                expected: "failed or cancelled",
                ..
            })
        ));

        Ok(())
    }

    #[sqlx::test]
    async fn release_returns_the_attempt(pool: PgPool) -> Result {
        let store = Store::new(pool);
        let now = Timestamp::now();

        let id = store.insert(&NewJob::new("work", "noop"), 5, now).await?;
        store.claim_one(now).await?.unwrap();

        let later = plus(now, 1);
        store.release(id, later).await?;

        let job = store.fetch(id).await?;
        assert_eq!(job.status, JobStatus::Retrying);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.scheduled_at, later);

        assert_eq!(store.claim_one(later).await?.unwrap().id, id);

        Ok(())
    }

    #[sqlx::test]
    async fn insert_many_returns_ids_in_order(pool: PgPool) -> Result {
        let store = Store::new(pool);
        let now = Timestamp::now();

        let jobs: Vec<_> = (0..3)
            .map(|n| NewJob::new(format!("job-{n}"), "noop"))
            .collect();
        let ids = store.insert_many(&jobs, 5, now).await?;
        assert_eq!(ids.len(), 3);

        for (n, id) in ids.iter().enumerate() {
            let job = store.fetch(*id).await?;
            assert_eq!(job.name, format!("job-{n}"));
        }

        Ok(())
    }

    #[sqlx::test]
    async fn insert_many_is_all_or_nothing(pool: PgPool) -> Result {
        let store = Store::new(pool);
        let now = Timestamp::now();

        // The second row violates the table's priority bound, failing the
        // batch partway through.
        let mut bad = NewJob::new("bad", "noop");
        bad.priority = 5_000;
        let jobs = vec![NewJob::new("good", "noop"), bad];

        let result = store.insert_many(&jobs, 5, now).await;
        assert!(matches!(result, Err(Error::Database(_))));

        let counts = store.counts_by_status().await?;
        assert_eq!(counts.total(), 0);

        Ok(())
    }

    #[sqlx::test]
    async fn insert_many_enforces_the_batch_bound(pool: PgPool) -> Result {
        let store = Store::new(pool);
        let now = Timestamp::now();

        let jobs: Vec<_> = (0..BULK_INSERT_BOUND + 1)
            .map(|n| NewJob::new(format!("job-{n}"), "noop"))
            .collect();

        assert!(matches!(
            store.insert_many(&jobs, 5, now).await,
            Err(Error::BatchTooLarge(len)) if len == BULK_INSERT_BOUND + 1
        ));

        Ok(())
    }

    #[sqlx::test]
    async fn counts_and_ready_depth(pool: PgPool) -> Result {
        let store = Store::new(pool);
        let now = Timestamp::now();

        store.insert(&NewJob::new("one", "noop"), 5, now).await?;
        store.insert(&NewJob::new("two", "noop"), 5, now).await?;
        store
            .insert(
                &NewJob::new("later", "noop").scheduled_at(plus(now, 60)),
                5,
                now,
            )
            .await?;
        store.claim_one(now).await?.unwrap();

        let counts = store.counts_by_status().await?;
        assert_eq!(counts.pending, 2);
        assert_eq!(counts.running, 1);
        assert_eq!(counts.total(), 3);

        // The future row is queued but not yet ready.
        assert_eq!(store.ready_count(now).await?, 1);
        assert_eq!(store.queued_entries(100).await?.len(), 2);

        Ok(())
    }

    #[sqlx::test]
    async fn list_filters_and_orders_newest_first(pool: PgPool) -> Result {
        let store = Store::new(pool);
        let now = Timestamp::now();

        let old = store
            .insert(&NewJob::new("old", "email"), 5, plus(now, -20))
            .await?;
        let recent = store
            .insert(&NewJob::new("recent", "email"), 5, plus(now, -10))
            .await?;
        let other = store.insert(&NewJob::new("other", "report"), 5, now).await?;

        let all = store.list(&JobFilter::any(), 10, 0).await?;
        assert_eq!(
            all.iter().map(|job| job.id).collect::<Vec<_>>(),
            vec![other, recent, old]
        );

        let emails = store
            .list(&JobFilter::any().with_job_type("email"), 10, 0)
            .await?;
        assert_eq!(
            emails.iter().map(|job| job.id).collect::<Vec<_>>(),
            vec![recent, old]
        );

        store.claim_one(now).await?.unwrap();
        let running = store
            .list(&JobFilter::any().with_status(JobStatus::Running), 10, 0)
            .await?;
        assert_eq!(running.len(), 1);

        let paged = store.list(&JobFilter::any(), 1, 1).await?;
        assert_eq!(paged.len(), 1);
        assert_eq!(paged[0].id, recent);

        Ok(())
    }
}
