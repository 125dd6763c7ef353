//! The worker pool: claims jobs and drives them through the executor.
//!
//! A single supervisor loop pulls claims from the queue coordinator and
//! spawns one execution task per claimed job, with a pool-wide semaphore
//! admitting at most `max_workers` in-flight executions. When the queue is
//! empty the loop sleeps for the poll interval; when the durable store is
//! unreachable it backs off with doubling delays instead of spinning.
//!
//! # Shutdown
//!
//! Cancelling the shutdown token stops new claims. In-flight executions get
//! a grace period to finish on their own; whatever remains is then
//! interrupted and released back to the queue, so interrupted jobs resume
//! after a restart rather than counting as failures.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{OwnedSemaphorePermit, Semaphore},
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;

use crate::{config::Config, executor::Executor, queue::Queue, timestamp::Timestamp};

const STORE_BACKOFF_INITIAL: Duration = Duration::from_secs(1);
const STORE_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// A pool of concurrent job workers.
pub struct Worker {
    queue: Queue,
    executor: Executor,
    max_workers: usize,
    poll_interval: Duration,
    shutdown_grace: Duration,
    shutdown_token: CancellationToken,
    interrupt_token: CancellationToken,
}

impl Worker {
    /// Creates a worker pool over the given queue and executor.
    pub fn new(queue: Queue, executor: Executor, config: &Config) -> Self {
        Self {
            queue,
            executor,
            max_workers: config.max_workers,
            poll_interval: config.poll_interval,
            shutdown_grace: config.shutdown_grace,
            shutdown_token: CancellationToken::new(),
            interrupt_token: CancellationToken::new(),
        }
    }

    /// Sets the token that signals this pool to shut down.
    pub fn set_shutdown_token(&mut self, shutdown_token: CancellationToken) {
        self.shutdown_token = shutdown_token;
    }

    /// Runs the pool until its shutdown token fires, then drains.
    pub async fn run(&self) {
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut executions = JoinSet::new();
        let mut store_backoff = STORE_BACKOFF_INITIAL;

        tracing::info!(max_workers = self.max_workers, "worker pool started");

        loop {
            // Reap finished executions so the join set doesn't grow without
            // bound.
            while let Some(result) = executions.try_join_next() {
                if let Err(err) = result {
                    tracing::error!(err = %err, "execution task failed");
                }
            }

            let Some(permit) = self.acquire_permit(&semaphore).await else {
                break;
            };

            let claimed = tokio::select! {
                _ = self.shutdown_token.cancelled() => break,
                claimed = self.queue.next_job(Timestamp::now()) => claimed,
            };

            match claimed {
                Ok(Some(job)) => {
                    store_backoff = STORE_BACKOFF_INITIAL;

                    let executor = self.executor.clone();
                    let interrupt = self.interrupt_token.clone();
                    executions.spawn(async move {
                        let _permit = permit;
                        if let Err(err) = executor.execute(job, interrupt).await {
                            tracing::error!(err = %err, "failed to record job outcome");
                        }
                    });
                }

                Ok(None) => {
                    drop(permit);
                    if self.idle(self.poll_interval).await {
                        break;
                    }
                }

                Err(err) => {
                    drop(permit);
                    tracing::warn!(
                        err = %err,
                        backoff = ?store_backoff,
                        "queue unavailable, backing off"
                    );
                    if self.idle(store_backoff).await {
                        break;
                    }
                    store_backoff = (store_backoff * 2).min(STORE_BACKOFF_MAX);
                }
            }
        }

        self.drain(executions).await;
    }

    async fn acquire_permit(&self, semaphore: &Arc<Semaphore>) -> Option<OwnedSemaphorePermit> {
        tokio::select! {
            _ = self.shutdown_token.cancelled() => None,
            permit = semaphore.clone().acquire_owned() => permit.ok(),
        }
    }

    /// Sleeps for the period unless shutdown fires first; returns whether it
    /// did.
    async fn idle(&self, period: Duration) -> bool {
        tokio::select! {
            _ = self.shutdown_token.cancelled() => true,
            _ = tokio::time::sleep(period) => false,
        }
    }

    async fn drain(&self, mut executions: JoinSet<()>) {
        if !executions.is_empty() {
            tracing::info!(in_flight = executions.len(), "draining in-flight executions");
        }

        let drained = tokio::time::timeout(self.shutdown_grace, async {
            while let Some(result) = executions.join_next().await {
                if let Err(err) = result {
                    tracing::error!(err = %err, "execution task failed");
                }
            }
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                remaining = executions.len(),
                "grace period elapsed, interrupting remaining executions"
            );
            self.interrupt_token.cancel();
            while let Some(result) = executions.join_next().await {
                if let Err(err) = result {
                    tracing::error!(err = %err, "execution task failed");
                }
            }
        }

        tracing::info!("worker pool stopped");
    }
}
