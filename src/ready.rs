//! The fast tier: a priority-ordered index of jobs awaiting dispatch.
//!
//! The index is advisory. It accelerates the common dequeue path but is
//! never the source of truth: every entry popped from it is re-checked
//! against the durable store, which alone decides whether the job is still
//! claimable. Entries may therefore be stale, duplicated, or missing without
//! affecting correctness, and index failures only cost speed.
//!
//! Entries order by `(priority desc, scheduled_at asc, id asc)` — the same
//! total order a shared sorted set encodes with a composite numeric score of
//! negated priority plus millisecond timestamp. The crate ships
//! [`SortedIndex`], an in-memory implementation suitable for single-instance
//! deployments; multi-instance deployments can provide their own
//! [`ReadyIndex`] over a shared ordered-set service.

use std::{
    cmp::Ordering,
    collections::{BTreeSet, HashMap},
    future::Future,
    pin::Pin,
    sync::Mutex,
};

use crate::{job::JobId, timestamp::Timestamp};

/// A type alias for ready index results.
pub type Result<T = ()> = std::result::Result<T, Error>;

/// The boxed future [`ReadyIndex`] methods return, keeping the trait object
/// safe for alternative backends.
pub type IndexFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Ready index errors.
///
/// All variants are treated as transient: callers bypass the index and fall
/// back to the durable store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The backing service could not be reached.
    #[error("ready index unavailable: {0}")]
    Unavailable(String),
}

/// An index entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::FromRow)]
pub struct Entry {
    /// Job identifier; the index member.
    pub id: JobId,

    /// Dispatch priority; the dominant ordering term.
    pub priority: i32,

    /// Eligibility instant; the tiebreak.
    pub scheduled_at: Timestamp,
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.scheduled_at.cmp(&other.scheduled_at))
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A priority-ordered index of jobs awaiting dispatch.
pub trait ReadyIndex: Send + Sync {
    /// Inserts an entry, replacing any existing entry for the same job.
    fn push(&self, entry: Entry) -> IndexFuture<'_, ()>;

    /// Removes and returns the highest-priority entry due at `now`.
    ///
    /// Entries scheduled beyond `now` are skipped, not returned and not
    /// removed.
    fn pop_ready(&self, now: Timestamp) -> IndexFuture<'_, Option<JobId>>;

    /// Removes the entry for the given job, if present.
    fn remove(&self, id: JobId) -> IndexFuture<'_, ()>;

    /// Number of entries currently indexed.
    fn len(&self) -> IndexFuture<'_, usize>;
}

#[derive(Debug, Default)]
struct Entries {
    ordered: BTreeSet<Entry>,
    by_id: HashMap<JobId, Entry>,
}

/// In-memory [`ReadyIndex`] over a sorted set.
///
/// Suitable for single-instance deployments; all operations are infallible.
#[derive(Debug, Default)]
pub struct SortedIndex {
    entries: Mutex<Entries>,
}

impl SortedIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entries<T>(&self, f: impl FnOnce(&mut Entries) -> T) -> T {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut entries)
    }
}

impl ReadyIndex for SortedIndex {
    fn push(&self, entry: Entry) -> IndexFuture<'_, ()> {
        self.with_entries(|entries| {
            if let Some(previous) = entries.by_id.insert(entry.id, entry) {
                entries.ordered.remove(&previous);
            }
            entries.ordered.insert(entry);
        });

        Box::pin(std::future::ready(Ok(())))
    }

    fn pop_ready(&self, now: Timestamp) -> IndexFuture<'_, Option<JobId>> {
        let popped = self.with_entries(|entries| {
            let due = entries
                .ordered
                .iter()
                .find(|entry| entry.scheduled_at <= now)
                .copied();

            if let Some(entry) = due {
                entries.ordered.remove(&entry);
                entries.by_id.remove(&entry.id);
            }

            due.map(|entry| entry.id)
        });

        Box::pin(std::future::ready(Ok(popped)))
    }

    fn remove(&self, id: JobId) -> IndexFuture<'_, ()> {
        self.with_entries(|entries| {
            if let Some(entry) = entries.by_id.remove(&id) {
                entries.ordered.remove(&entry);
            }
        });

        Box::pin(std::future::ready(Ok(())))
    }

    fn len(&self) -> IndexFuture<'_, usize> {
        let len = self.with_entries(|entries| entries.by_id.len());

        Box::pin(std::future::ready(Ok(len)))
    }
}
