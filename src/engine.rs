//! The engine: the per-process entrypoint tying every component together.
//!
//! An [`Engine`] is built once at startup with a connection pool, a
//! configuration, and the handlers the process knows how to run. It exposes
//! the submission and operator API (`submit`, `cancel`, `retry`, `get`,
//! `list`, `stats`) and starts the background machinery — the worker pool
//! and the fast-tier reclaim task — via [`start`](Engine::start), which
//! returns a handle used to drain everything at shutdown.
//!
//! # Example
//!
//! ```rust,no_run
//! use serde_json::json;
//! use sqlx::PgPool;
//! use taskmill::{handler::Result as HandlerResult, Engine, Handler, NewJob, Timestamp};
//!
//! struct SendEmail;
//!
//! impl Handler for SendEmail {
//!     const JOB_TYPE: &'static str = "email";
//!
//!     type Payload = serde_json::Value;
//!     type Output = serde_json::Value;
//!
//!     async fn execute(
//!         &self,
//!         payload: Self::Payload,
//!         _deadline: Timestamp,
//!     ) -> HandlerResult<Self::Output> {
//!         // Here you would integrate with an email service.
//!         Ok(json!({ "status": "sent", "payload": payload }))
//!     }
//! }
//!
//! # use tokio::runtime::Runtime;
//! # fn main() {
//! # let rt = Runtime::new().unwrap();
//! # rt.block_on(async {
//! let pool = PgPool::connect(&std::env::var("DATABASE_URL")?).await?;
//! taskmill::run_migrations(&pool).await?;
//!
//! let engine = Engine::builder()
//!     .handler(SendEmail)
//!     .pool(pool)
//!     .build();
//!
//! engine
//!     .submit(NewJob::new("welcome email", "email").payload(json!({ "to": "ferris" })))
//!     .await?;
//!
//! let handle = engine.start();
//! // ... serve traffic ...
//! handle.shutdown().await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! # }
//! ```

use std::{sync::Arc, time::Duration};

use builder_states::{Initial, PoolSet};
use sqlx::PgPool;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::{
    config::Config,
    executor::Executor,
    handler::{Handler, HandlerRegistry},
    job::{Job, JobFilter, JobId, NewJob, ValidationError},
    queue::{self, Queue},
    ready::{ReadyIndex, SortedIndex},
    stats::{Page, Snapshot},
    store::{self, Store},
    timestamp::Timestamp,
    worker::Worker,
};

/// How often queued rows are republished into the fast tier.
const RECLAIM_PERIOD: Duration = Duration::from_secs(30);

/// A type alias for engine results.
pub type Result<T = ()> = std::result::Result<T, Error>;

/// Engine errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A submission was rejected before reaching the queue.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Error returned from the queue coordinator.
    #[error(transparent)]
    Queue(#[from] queue::Error),

    /// Error returned from the durable store.
    #[error(transparent)]
    Store(#[from] store::Error),

    /// Error returned from Tokio task joins.
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
}

/// The per-process job engine.
pub struct Engine {
    queue: Queue,
    registry: Arc<HandlerRegistry>,
    config: Config,
}

impl Engine {
    /// Create a new builder.
    pub fn builder() -> Builder<Initial> {
        Builder::new()
    }

    /// Returns the engine configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the queue coordinator.
    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    /// Accepts a job for execution, returning its assigned ID.
    ///
    /// Validates the submission first; rejected jobs never reach the queue.
    pub async fn submit(&self, job: NewJob) -> Result<JobId> {
        self.validate(&job)?;
        Ok(self.queue.submit(&job, Timestamp::now()).await?)
    }

    /// Accepts a batch of jobs atomically, returning their assigned IDs.
    ///
    /// The whole batch is validated up front and inserted all-or-nothing.
    pub async fn submit_bulk(&self, jobs: Vec<NewJob>) -> Result<Vec<JobId>> {
        if jobs.is_empty() {
            return Err(ValidationError::EmptyBatch.into());
        }
        if jobs.len() > self.config.bulk_submit_cap {
            return Err(ValidationError::BatchTooLarge {
                len: jobs.len(),
                cap: self.config.bulk_submit_cap,
            }
            .into());
        }
        for job in &jobs {
            self.validate(job)?;
        }

        Ok(self.queue.submit_bulk(&jobs, Timestamp::now()).await?)
    }

    /// Fetches a job by ID.
    pub async fn get(&self, id: JobId) -> Result<Job> {
        Ok(self.queue.store().fetch(id).await?)
    }

    /// Lists jobs matching the filter, newest first.
    pub async fn list(&self, filter: &JobFilter, page: &Page) -> Result<Vec<Job>> {
        let (limit, offset) = page.limit_offset();
        Ok(self.queue.store().list(filter, limit, offset).await?)
    }

    /// Cancels a job that has not started running.
    pub async fn cancel(&self, id: JobId) -> Result<Job> {
        Ok(self.queue.cancel(id, Timestamp::now()).await?)
    }

    /// Returns a failed or cancelled job to the queue.
    pub async fn retry(&self, id: JobId) -> Result<Job> {
        Ok(self.queue.retry(id, Timestamp::now()).await?)
    }

    /// Samples status counts and queue depths.
    pub async fn stats(&self) -> Result<Snapshot> {
        let now = Timestamp::now();
        let counts = self.queue.store().counts_by_status().await?;
        let depth = self.queue.queue_depth(now).await?;

        Ok(Snapshot { counts, depth })
    }

    /// Starts the background machinery and returns a handle.
    ///
    /// Spawns the worker pool and the fast-tier reclaim task; both run until
    /// the handle is shut down.
    pub fn start(&self) -> EngineHandle {
        let shutdown_token = CancellationToken::new();
        let mut tasks = JoinSet::new();

        let executor = Executor::new(self.queue.clone(), self.registry.clone(), &self.config);
        let mut worker = Worker::new(self.queue.clone(), executor, &self.config);
        worker.set_shutdown_token(shutdown_token.clone());
        tasks.spawn(async move { worker.run().await });

        let reclaim_queue = self.queue.clone();
        let reclaim_shutdown = shutdown_token.clone();
        tasks.spawn(async move {
            reclaim_queue
                .run_reclaim_every(RECLAIM_PERIOD, reclaim_shutdown)
                .await;
        });

        tracing::info!("engine started");

        EngineHandle {
            tasks,
            shutdown_token,
        }
    }

    /// Runs the engine in the foreground.
    ///
    /// Equivalent to [`start`](Engine::start) without ever signalling
    /// shutdown; returns only if a background task fails to join.
    pub async fn run(&self) -> Result {
        let mut handle = self.start();

        while let Some(result) = handle.tasks.join_next().await {
            result?;
        }

        Ok(())
    }

    fn validate(&self, job: &NewJob) -> std::result::Result<(), ValidationError> {
        job.validate()?;

        if !self.registry.contains(&job.job_type) {
            return Err(ValidationError::UnknownJobType(job.job_type.clone()));
        }

        Ok(())
    }
}

/// Handle returned by [`Engine::start`].
pub struct EngineHandle {
    tasks: JoinSet<()>,
    shutdown_token: CancellationToken,
}

impl EngineHandle {
    /// Signals shutdown and waits for the background machinery to drain.
    ///
    /// The worker pool stops claiming, waits out the grace period for
    /// in-flight jobs, releases whatever remains, and only then does this
    /// method return.
    pub async fn shutdown(mut self) -> Result {
        tracing::info!("engine shutting down");
        self.shutdown_token.cancel();

        while let Some(result) = self.tasks.join_next().await {
            result?;
        }

        tracing::info!("engine stopped");

        Ok(())
    }
}

mod builder_states {
    use sqlx::PgPool;

    pub struct Initial;

    pub struct PoolSet {
        pub(super) pool: PgPool,
    }
}

/// A builder for [`Engine`].
pub struct Builder<S> {
    state: S,
    config: Config,
    registry: HandlerRegistry,
    index: Option<Arc<dyn ReadyIndex>>,
}

impl Builder<Initial> {
    /// Creates a new `Builder` with the default configuration and an empty
    /// registry.
    pub fn new() -> Self {
        Self {
            state: Initial,
            config: Config::default(),
            registry: HandlerRegistry::new(),
            index: None,
        }
    }

    /// Sets the connection pool.
    pub fn pool(self, pool: PgPool) -> Builder<PoolSet> {
        Builder {
            state: PoolSet { pool },
            config: self.config,
            registry: self.registry,
            index: self.index,
        }
    }
}

impl Default for Builder<Initial> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Builder<S> {
    /// Sets the engine configuration.
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Registers a handler under its job type.
    pub fn handler<H: Handler>(mut self, handler: H) -> Self {
        self.registry.register(handler);
        self
    }

    /// Provides a custom fast-tier index, e.g. one backed by a shared
    /// ordered-set service.
    ///
    /// Without this, an in-memory [`SortedIndex`] is used whenever the fast
    /// tier is enabled.
    pub fn ready_index(mut self, index: Arc<dyn ReadyIndex>) -> Self {
        self.index = Some(index);
        self
    }
}

impl Builder<PoolSet> {
    /// Builds the `Engine`.
    pub fn build(self) -> Engine {
        let store = Store::new(self.state.pool);

        let index = if self.config.use_fast_queue {
            Some(
                self.index
                    .unwrap_or_else(|| Arc::new(SortedIndex::new()) as Arc<dyn ReadyIndex>),
            )
        } else {
            None
        };

        let queue = Queue::new(store, index, self.config.max_retries);

        Engine {
            queue,
            registry: Arc::new(self.registry),
            config: self.config,
        }
    }
}
