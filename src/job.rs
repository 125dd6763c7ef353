//! Jobs are the unit of work the engine accepts, schedules, and executes.
//!
//! A [`Job`] is the authoritative row persisted by the store: submission
//! fields plus execution bookkeeping (status, attempt counter, outcome).
//! Callers construct a [`NewJob`] and hand it to
//! [`Engine::submit`](crate::Engine::submit); everything else on `Job` is
//! written by the engine itself.
//!
//! Payloads are opaque to the engine. They are stored as JSON and interpreted
//! only by the handler registered for the job's `job_type`.
//!
//! # Example
//!
//! ```rust
//! use serde_json::json;
//! use taskmill::NewJob;
//!
//! let new_job = NewJob::new("welcome email", "email")
//!     .priority(10)
//!     .payload(json!({ "to": "ferris@example.com" }));
//! assert!(new_job.validate().is_ok());
//! ```

use std::{
    fmt::{self, Display},
    ops::Deref,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;
use uuid::Uuid;

use crate::timestamp::Timestamp;

/// Maximum length of a job name, in characters.
pub const MAX_NAME_LEN: usize = 200;

/// Inclusive priority bounds accepted at submission.
pub const PRIORITY_RANGE: std::ops::RangeInclusive<i32> = -1000..=1000;

/// Maximum serialized payload size accepted at submission, in bytes.
pub const MAX_PAYLOAD_BYTES: usize = 256 * 1024;

/// A type alias for job identifiers.
///
/// Job IDs are [ULID][ULID]s which are converted to UUID for storage. ULIDs
/// sort by creation time, so ordering by ID is ordering by submission.
///
/// [ULID]: https://github.com/ulid/spec?tab=readme-ov-file#specification
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    Hash,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    sqlx::Type,
)]
#[sqlx(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub(crate) fn new() -> Self {
        Self(Ulid::new().into())
    }
}

impl Deref for JobId {
    type Target = Uuid;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Represents the possible states a job can be in.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Awaiting its first claim.
    Pending,

    /// Claimed by a worker and currently executing.
    Running,

    /// Execution completed successfully.
    Succeeded,

    /// Retries exhausted or failure was terminal.
    Failed,

    /// Removed from the queue before execution.
    Cancelled,

    /// Failed and waiting out its backoff delay.
    Retrying,
}

impl JobStatus {
    /// Returns the status as its stored string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Retrying => "retrying",
        }
    }

    /// Whether no further transitions occur without an operator command.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted job row.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Job {
    /// Server-assigned identifier, stable for the job's lifetime.
    pub id: JobId,

    /// Short human label.
    pub name: String,

    /// Tag identifying which handler processes this job.
    pub job_type: String,

    /// Dispatch priority; higher values dispatch earlier.
    pub priority: i32,

    /// Opaque handler input.
    pub payload: Value,

    /// Current lifecycle state.
    pub status: JobStatus,

    /// Number of times execution has begun.
    pub attempts: i32,

    /// Failures beyond this count are terminal.
    pub max_retries: i32,

    /// Instant at or after which the job is eligible to run.
    pub scheduled_at: Timestamp,

    /// Submission instant.
    pub created_at: Timestamp,

    /// Set when execution first begins.
    pub started_at: Option<Timestamp>,

    /// Set when the job reaches a terminal state.
    pub completed_at: Option<Timestamp>,

    /// Opaque handler output, present after success.
    pub result: Option<Value>,

    /// Last failure reason.
    pub error: Option<String>,

    /// Submitter identifier, stored opaquely.
    pub owner_id: Option<String>,
}

/// A job submission.
///
/// Unset optional fields fall back to the engine configuration at submit
/// time: `max_retries` defaults to the configured cap and `scheduled_at`
/// defaults to now.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    /// Short human label.
    pub name: String,

    /// Tag identifying which handler processes this job.
    pub job_type: String,

    /// Dispatch priority; higher values dispatch earlier.
    pub priority: i32,

    /// Opaque handler input.
    pub payload: Value,

    /// Per-job override of the retry cap.
    pub max_retries: Option<i32>,

    /// Instant at or after which the job becomes eligible; may be in the
    /// past.
    pub scheduled_at: Option<Timestamp>,

    /// Submitter identifier, stored opaquely.
    pub owner_id: Option<String>,
}

impl NewJob {
    /// Creates a submission with default priority and an empty payload.
    pub fn new(name: impl Into<String>, job_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            job_type: job_type.into(),
            priority: 0,
            payload: Value::Object(serde_json::Map::new()),
            max_retries: None,
            scheduled_at: None,
            owner_id: None,
        }
    }

    /// Sets the dispatch priority.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the handler payload.
    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Overrides the retry cap for this job.
    pub fn max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Defers eligibility until the given instant.
    pub fn scheduled_at(mut self, scheduled_at: Timestamp) -> Self {
        self.scheduled_at = Some(scheduled_at);
        self
    }

    /// Records the submitter.
    pub fn owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    /// Checks field-level constraints.
    ///
    /// Whether `job_type` names a registered handler is checked separately by
    /// the engine, which owns the registry.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::EmptyName);
        }

        let name_len = self.name.chars().count();
        if name_len > MAX_NAME_LEN {
            return Err(ValidationError::NameTooLong { len: name_len });
        }

        if !PRIORITY_RANGE.contains(&self.priority) {
            return Err(ValidationError::PriorityOutOfRange(self.priority));
        }

        if let Some(max_retries) = self.max_retries {
            if max_retries < 0 {
                return Err(ValidationError::NegativeMaxRetries(max_retries));
            }
        }

        let payload_bytes = self.payload.to_string().len();
        if payload_bytes > MAX_PAYLOAD_BYTES {
            return Err(ValidationError::PayloadTooLarge {
                bytes: payload_bytes,
            });
        }

        Ok(())
    }
}

/// Rejected submissions.
///
/// These surface to the caller synchronously; a rejected job never reaches
/// the queue.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The job name is empty.
    #[error("job name must not be empty")]
    EmptyName,

    /// The job name exceeds [`MAX_NAME_LEN`] characters.
    #[error("job name of {len} characters exceeds the maximum of {MAX_NAME_LEN}")]
    NameTooLong {
        /// Length of the rejected name.
        len: usize,
    },

    /// The priority falls outside [`PRIORITY_RANGE`].
    #[error("priority {0} is outside the accepted range of -1000..=1000")]
    PriorityOutOfRange(i32),

    /// The serialized payload exceeds [`MAX_PAYLOAD_BYTES`].
    #[error("payload of {bytes} bytes exceeds the maximum of {MAX_PAYLOAD_BYTES}")]
    PayloadTooLarge {
        /// Serialized size of the rejected payload.
        bytes: usize,
    },

    /// The retry cap is negative.
    #[error("max_retries must be non-negative, got {0}")]
    NegativeMaxRetries(i32),

    /// No handler is registered for the submitted job type.
    #[error("unknown job type: {0}")]
    UnknownJobType(String),

    /// A bulk submission exceeds the configured cap.
    #[error("bulk submission of {len} jobs exceeds the cap of {cap}")]
    BatchTooLarge {
        /// Number of jobs in the rejected batch.
        len: usize,
        /// Configured batch cap.
        cap: usize,
    },

    /// A bulk submission contains no jobs.
    #[error("bulk submission must contain at least one job")]
    EmptyBatch,
}

/// Criteria for listing jobs.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    /// Restrict to a single status.
    pub status: Option<JobStatus>,

    /// Restrict to a single job type.
    pub job_type: Option<String>,
}

impl JobFilter {
    /// Matches every job.
    pub fn any() -> Self {
        Self::default()
    }

    /// Restricts the filter to the given status.
    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Restricts the filter to the given job type.
    pub fn with_job_type(mut self, job_type: impl Into<String>) -> Self {
        self.job_type = Some(job_type.into());
        self
    }
}
