//! # Taskmill
//!
//! ⚙️ An asynchronous job processing engine over Postgres.
//!
//! # Overview
//!
//! **Taskmill** accepts work items, queues them with priority and future
//! scheduling, and dispatches them to a bounded pool of concurrent workers
//! with per-job timeouts and exponential-backoff retries. Jobs are claimed
//! with `FOR UPDATE SKIP LOCKED`, so any number of workers — in one process
//! or many — dispatch from the same queue without ever running a job twice.
//!
//! Key features:
//!
//! - **PostgreSQL-Backed**: Leverages PostgreSQL with `FOR UPDATE SKIP
//!   LOCKED` for reliable job storage and coordination.
//! - **Dual-Tier Queue**: An advisory in-memory (or shared) priority index
//!   accelerates dispatch, while the durable store stays the single source
//!   of truth.
//! - **Automatic Retries**: Failed jobs reschedule themselves with
//!   exponential backoff until their retry cap is exhausted.
//! - **Bounded Concurrency**: A pool-wide semaphore admits at most
//!   `max_workers` in-flight executions per process.
//! - **Graceful Shutdown**: Draining workers finish what they can within a
//!   grace period; interrupted jobs are released and resume after restart.
//! - **Operator Commands**: Cancel queued jobs, retry failed ones, and
//!   inspect counts and queue depths.
//!
//! # Example
//!
//! ```rust,no_run
//! use serde_json::json;
//! use sqlx::PgPool;
//! use taskmill::{handler::Result as HandlerResult, Engine, Handler, NewJob, Timestamp};
//!
//! // The payload arrives deserialized into the handler's own type.
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
//!         Ok(json!({ "status": "sent" }))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Set up the database connection pool.
//!     let database_url = &std::env::var("DATABASE_URL")?;
//!     let pool = PgPool::connect(database_url).await?;
//!
//!     // Run migrations.
//!     taskmill::run_migrations(&pool).await?;
//!
//!     // Build the engine with its handlers.
//!     let engine = Engine::builder().handler(SendEmail).pool(pool).build();
//!
//!     // Submit a job; a worker will pick it up shortly.
//!     engine
//!         .submit(
//!             NewJob::new("welcome email", "email")
//!                 .priority(10)
//!                 .payload(json!({ "to": "ferris@example.com" })),
//!         )
//!         .await?;
//!
//!     // Start processing and drain on your shutdown signal.
//!     let handle = engine.start();
//!     handle.shutdown().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Concepts
//!
//! - [Jobs](job) are the unit of work: a payload, a priority, a schedule,
//!   and a retry budget.
//! - [Handlers](handler) perform the work, registered per job type.
//! - The [store](store) is the durable tier; its skip-locked claim is the
//!   engine's only hard serialization point.
//! - The [ready index](ready) is the advisory fast tier.
//! - The [queue](queue) coordinates the two tiers.
//! - [Workers](worker) pull claims and drive the [executor](executor).
//! - The [engine](engine) wires everything together per process.
//!
//! ```text
//!  submit ──▶ ╭───────────╮      ╭─────────────╮
//!             │   Queue   │─────▶│ Ready index │ (advisory)
//!             ╰─────┬─────╯      ╰──────┬──────╯
//!                   │                   │ pop
//!                   ▼                   ▼
//!             ╭───────────╮      ╭───────────╮      ╭──────────╮
//!             │   Store   │◀─────│  Workers  │─────▶│ Executor │
//!             │ (claims)  │      ╰───────────╯      ╰────┬─────╯
//!             ╰───────────╯                              │
//!                   ▲              success / retry       │
//!                   ╰────────────────────────────────────╯
//! ```
//!
//! # Migrations
//!
//! Schema changes are explicit sqlx migrations embedded in the crate. Run
//! them with [`run_migrations`] as a deploy step; calling it at process
//! startup also works as a development convenience.
#![warn(clippy::all, nonstandard_style, future_incompatible, missing_docs)]
#![forbid(unsafe_code)]

use sqlx::{migrate::Migrator, Acquire, Postgres};

pub use crate::{
    config::Config,
    engine::{Engine, EngineHandle},
    executor::Executor,
    handler::{Handler, HandlerRegistry},
    job::{Job, JobFilter, JobId, JobStatus, NewJob, ValidationError},
    queue::Queue,
    ready::{ReadyIndex, SortedIndex},
    retry::{Decision, RetryPolicy},
    stats::{Page, QueueDepth, Snapshot, StatusCounts},
    store::{Outcome, Store},
    timestamp::Timestamp,
    worker::Worker,
};

pub mod config;
pub mod engine;
pub mod executor;
pub mod handler;
pub mod job;
pub mod queue;
pub mod ready;
pub mod retry;
pub mod stats;
pub mod store;
pub mod timestamp;
pub mod worker;

static MIGRATOR: Migrator = sqlx::migrate!();

/// Runs Taskmill migrations.
///
/// These migrations must be applied before jobs can be submitted or
/// processed. All engine state lives in a dedicated schema, called
/// `taskmill`, which the first migration creates.
///
/// A transaction is acquired via the provided connection and migrations are
/// run via this transaction.
///
/// # Example
///
/// ```rust,no_run
/// # use tokio::runtime::Runtime;
/// use sqlx::PgPool;
///
/// # fn main() {
/// # let rt = Runtime::new().unwrap();
/// # rt.block_on(async {
/// let database_url = &std::env::var("DATABASE_URL")?;
/// let pool = PgPool::connect(database_url).await?;
///
/// taskmill::run_migrations(&pool).await?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// # });
/// # }
/// ```
pub async fn run_migrations<'a, A>(conn: A) -> Result<(), sqlx::Error>
where
    A: Acquire<'a, Database = Postgres>,
{
    let mut tx = conn.begin().await?;

    MIGRATOR.run(&mut *tx).await?;

    tx.commit().await?;

    Ok(())
}
