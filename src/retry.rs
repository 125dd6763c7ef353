//! Retry policy: decides what happens to a job after a failed execution.
//!
//! Given the attempt counter recorded at claim time, a failure either
//! reschedules the job with an exponentially growing delay or, once the
//! job's retry cap is exhausted, becomes terminal.

use jiff::SignedDuration;

use crate::timestamp::Timestamp;

/// Configuration of a policy for retries in case of job failure.
///
/// The delay before attempt `n + 1` is `backoff_base ^ n` seconds, clamped to
/// the maximum delay.
///
/// # Example
///
/// ```rust
/// use taskmill::retry::RetryPolicy;
///
/// let retry_policy = RetryPolicy::builder().backoff_base(4.0).build();
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub(crate) backoff_base: f64,
    pub(crate) max_delay: SignedDuration,
}

const DEFAULT_RETRY_POLICY: RetryPolicy = RetryPolicy {
    backoff_base: 2.0,
    max_delay: SignedDuration::from_secs(60 * 60),
};

/// What the store should record for a failed execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Reschedule the job to run again at the given instant.
    Retry {
        /// Instant at which the job becomes eligible again.
        scheduled_at: Timestamp,
    },

    /// The failure is final.
    Terminal,
}

impl RetryPolicy {
    /// Create a new builder.
    pub const fn builder() -> Builder {
        Builder::new()
    }

    /// Decides the fate of a job whose execution just failed.
    ///
    /// `attempts` is the counter after the failed attempt was recorded, so
    /// the first failure arrives with `attempts == 1`.
    pub fn decide(&self, attempts: i32, max_retries: i32, now: Timestamp) -> Decision {
        if attempts > max_retries {
            return Decision::Terminal;
        }

        Decision::Retry {
            scheduled_at: now.saturating_add(self.delay_after(attempts)),
        }
    }

    /// Returns the backoff delay applied after the given attempt count.
    pub fn delay_after(&self, attempts: i32) -> SignedDuration {
        let seconds = self
            .backoff_base
            .powi(attempts)
            .min(self.max_delay.as_secs_f64());
        SignedDuration::from_millis((seconds * 1_000.0) as i64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        DEFAULT_RETRY_POLICY
    }
}

/// A builder for [`RetryPolicy`].
#[derive(Debug)]
pub struct Builder {
    inner: RetryPolicy,
}

impl Builder {
    /// Creates a new `Builder` with the default retry settings.
    pub const fn new() -> Self {
        Self {
            inner: DEFAULT_RETRY_POLICY,
        }
    }

    /// Sets the base of the exponential delay.
    ///
    /// Default value is `2.0`.
    pub const fn backoff_base(mut self, backoff_base: f64) -> Self {
        self.inner.backoff_base = backoff_base;
        self
    }

    /// Sets the upper bound on any single delay.
    ///
    /// Default value is one hour.
    pub const fn max_delay(mut self, max_delay: SignedDuration) -> Self {
        self.inner.max_delay = max_delay;
        self
    }

    /// Builds the `RetryPolicy` with the configured parameters.
    pub const fn build(self) -> RetryPolicy {
        self.inner
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}
