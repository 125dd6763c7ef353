//! Introspection types for operators: status counts, queue depths, paging.

use serde::{Deserialize, Serialize};

use crate::job::JobStatus;

/// Default number of jobs per listing page.
pub const DEFAULT_PAGE_SIZE: i64 = 50;

/// Upper bound on the number of jobs per listing page.
pub const MAX_PAGE_SIZE: i64 = 500;

/// Per-status job counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    /// Jobs awaiting their first claim.
    pub pending: i64,

    /// Jobs currently executing.
    pub running: i64,

    /// Jobs that completed successfully.
    pub succeeded: i64,

    /// Jobs that failed terminally.
    pub failed: i64,

    /// Jobs cancelled before execution.
    pub cancelled: i64,

    /// Jobs waiting out a backoff delay.
    pub retrying: i64,
}

impl StatusCounts {
    /// Total number of jobs across all statuses.
    pub fn total(&self) -> i64 {
        self.pending + self.running + self.succeeded + self.failed + self.cancelled + self.retrying
    }

    /// Returns the count for a single status.
    pub fn get(&self, status: JobStatus) -> i64 {
        match status {
            JobStatus::Pending => self.pending,
            JobStatus::Running => self.running,
            JobStatus::Succeeded => self.succeeded,
            JobStatus::Failed => self.failed,
            JobStatus::Cancelled => self.cancelled,
            JobStatus::Retrying => self.retrying,
        }
    }

    pub(crate) fn set(&mut self, status: JobStatus, count: i64) {
        match status {
            JobStatus::Pending => self.pending = count,
            JobStatus::Running => self.running = count,
            JobStatus::Succeeded => self.succeeded = count,
            JobStatus::Failed => self.failed = count,
            JobStatus::Cancelled => self.cancelled = count,
            JobStatus::Retrying => self.retrying = count,
        }
    }
}

/// Sizes of the two queue tiers.
///
/// A snapshot, not transactional: the tiers are sampled independently, so a
/// job in flight between them may be counted in both or neither.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDepth {
    /// Entries in the fast tier.
    pub fast: i64,

    /// Eligible rows in the durable store.
    pub durable_ready: i64,
}

/// An operator-facing snapshot of engine state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Per-status job counts.
    pub counts: StatusCounts,

    /// Sizes of the two queue tiers.
    pub depth: QueueDepth,
}

/// A page of a job listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    /// One-based page number.
    pub number: i64,

    /// Jobs per page, clamped to [`MAX_PAGE_SIZE`].
    pub size: i64,
}

impl Page {
    /// Creates a page specification.
    pub fn new(number: i64, size: i64) -> Self {
        Self { number, size }
    }

    /// Returns the `(limit, offset)` pair this page maps to.
    pub fn limit_offset(&self) -> (i64, i64) {
        let size = self.size.clamp(1, MAX_PAGE_SIZE);
        let number = self.number.max(1);
        (size, (number - 1) * size)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            number: 1,
            size: DEFAULT_PAGE_SIZE,
        }
    }
}
