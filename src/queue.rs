//! The queue coordinator: one enqueue and dequeue flow over both tiers.
//!
//! Submissions are written to the durable store first and then published to
//! the fast tier; dequeues pop the fast tier first and confirm against the
//! store. Because every fast-tier pop is followed by a focused durable claim,
//! the store remains the sole arbiter of who runs what — the fast tier can
//! be stale, lossy, or down entirely and the engine degrades to store scans
//! without dropping or double-dispatching a job.
//!
//! A periodic reclaim scan republishes queued rows into the fast tier,
//! covering index restarts and drift between the tiers.

use std::{sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::{
    job::{Job, JobId, NewJob},
    ready::{Entry, ReadyIndex},
    stats::QueueDepth,
    store::{self, Store},
    timestamp::Timestamp,
};

/// A type alias for queue results.
pub type Result<T = ()> = std::result::Result<T, Error>;

/// How many stale fast-tier entries a single dequeue will discard before
/// falling back to a store scan.
const POP_ATTEMPTS: usize = 3;

/// Rows republished per reclaim scan.
const RECLAIM_BATCH: i64 = 1_000;

/// Queue errors.
///
/// Fast-tier failures never surface here; they are logged and bypassed.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Error returned from the durable store.
    #[error(transparent)]
    Store(#[from] store::Error),
}

/// Coordinates the durable store and the advisory ready index.
#[derive(Clone)]
pub struct Queue {
    store: Store,
    index: Option<Arc<dyn ReadyIndex>>,
    default_max_retries: i32,
}

impl Queue {
    /// Creates a coordinator over the given tiers.
    ///
    /// Passing `None` for the index runs the queue on store scans alone.
    pub fn new(store: Store, index: Option<Arc<dyn ReadyIndex>>, default_max_retries: i32) -> Self {
        Self {
            store,
            index,
            default_max_retries,
        }
    }

    /// Returns the durable store.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Accepts a job, returning its assigned ID.
    ///
    /// The durable insert decides acceptance; publication to the fast tier
    /// is best-effort.
    #[instrument(skip(self, job), fields(job.job_type = %job.job_type, job.id = tracing::field::Empty), err)]
    pub async fn submit(&self, job: &NewJob, now: Timestamp) -> Result<JobId> {
        let id = self.store.insert(job, self.default_max_retries, now).await?;
        tracing::Span::current().record("job.id", id.to_string());

        self.publish(Entry {
            id,
            priority: job.priority,
            scheduled_at: job.scheduled_at.unwrap_or(now),
        })
        .await;

        Ok(id)
    }

    /// Accepts a batch of jobs atomically, returning their assigned IDs.
    #[instrument(skip(self, jobs), fields(batch.len = jobs.len()), err)]
    pub async fn submit_bulk(&self, jobs: &[NewJob], now: Timestamp) -> Result<Vec<JobId>> {
        let ids = self
            .store
            .insert_many(jobs, self.default_max_retries, now)
            .await?;

        for (job, id) in jobs.iter().zip(&ids) {
            self.publish(Entry {
                id: *id,
                priority: job.priority,
                scheduled_at: job.scheduled_at.unwrap_or(now),
            })
            .await;
        }

        Ok(ids)
    }

    /// Claims the next job due at `now`, if any.
    ///
    /// Pops the fast tier and confirms each candidate against the store,
    /// discarding entries that are no longer claimable; an empty, exhausted,
    /// or unavailable fast tier falls through to a durable scan. Whatever
    /// the path, a job is only ever handed out by the store's atomic claim.
    pub async fn next_job(&self, now: Timestamp) -> Result<Option<Job>> {
        if let Some(index) = &self.index {
            for _ in 0..POP_ATTEMPTS {
                match index.pop_ready(now).await {
                    Ok(Some(id)) => match self.store.claim_one_by_id(id, now).await? {
                        Some(job) => return Ok(Some(job)),
                        None => {
                            tracing::debug!(
                                job.id = %id,
                                "ready index entry no longer claimable, discarding"
                            );
                        }
                    },
                    Ok(None) => break,
                    Err(err) => {
                        tracing::warn!(err = %err, "ready index unavailable, scanning the store");
                        break;
                    }
                }
            }
        }

        Ok(self.store.claim_one(now).await?)
    }

    /// Cancels a job that has not started running.
    #[instrument(skip(self), fields(job.id = %id), err)]
    pub async fn cancel(&self, id: JobId, now: Timestamp) -> Result<Job> {
        let job = self.store.cancel(id, now).await?;

        if let Some(index) = &self.index {
            if let Err(err) = index.remove(id).await {
                tracing::warn!(err = %err, job.id = %id, "failed to drop cancelled job from the ready index");
            }
        }

        Ok(job)
    }

    /// Returns a failed or cancelled job to the queue.
    #[instrument(skip(self), fields(job.id = %id), err)]
    pub async fn retry(&self, id: JobId, now: Timestamp) -> Result<Job> {
        let job = self.store.reset_for_retry(id, now).await?;

        self.publish(Entry {
            id: job.id,
            priority: job.priority,
            scheduled_at: job.scheduled_at,
        })
        .await;

        Ok(job)
    }

    /// Best-effort publication of an index entry.
    pub(crate) async fn publish(&self, entry: Entry) {
        if let Some(index) = &self.index {
            if let Err(err) = index.push(entry).await {
                tracing::warn!(err = %err, job.id = %entry.id, "failed to publish job to the ready index");
            }
        }
    }

    /// Republishes queued rows into the fast tier, returning how many were
    /// pushed.
    ///
    /// Pushes are upserts, so rows already indexed are refreshed in place.
    pub async fn reclaim_scan(&self) -> Result<usize> {
        let Some(index) = &self.index else {
            return Ok(0);
        };

        let entries = self.store.queued_entries(RECLAIM_BATCH).await?;

        let mut republished = 0;
        for entry in entries {
            match index.push(entry).await {
                Ok(()) => republished += 1,
                Err(err) => {
                    tracing::warn!(err = %err, "ready index unavailable during reclaim");
                    break;
                }
            }
        }

        Ok(republished)
    }

    /// Runs the reclaim scan on an interval until shutdown.
    ///
    /// Scan failures are logged and retried on the next tick.
    pub async fn run_reclaim_every(&self, period: Duration, shutdown: CancellationToken) {
        if self.index.is_none() {
            return;
        }

        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,

                _ = interval.tick() => {
                    match self.reclaim_scan().await {
                        Ok(republished) if republished > 0 => {
                            tracing::debug!(republished, "republished queued jobs to the ready index");
                        }
                        Ok(_) => {}
                        Err(err) => {
                            tracing::warn!(err = %err, "reclaim scan failed");
                        }
                    }
                }
            }
        }
    }

    /// Samples the sizes of both tiers.
    ///
    /// A snapshot, not transactional.
    pub async fn queue_depth(&self, now: Timestamp) -> Result<QueueDepth> {
        let durable_ready = self.store.ready_count(now).await?;

        let fast = match &self.index {
            Some(index) => match index.len().await {
                Ok(len) => len as i64,
                Err(err) => {
                    tracing::warn!(err = %err, "ready index unavailable, reporting an empty fast tier");
                    0
                }
            },
            None => 0,
        };

        Ok(QueueDepth {
            fast,
            durable_ready,
        })
    }
}
