//! Engine configuration.
//!
//! A plain options struct with production defaults. Loading values from the
//! environment or a config file is the embedding application's concern; the
//! engine only consumes the resolved struct.

use std::time::Duration;

/// Engine options.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
///
/// use taskmill::Config;
///
/// let config = Config::builder()
///     .max_workers(4)
///     .job_timeout(Duration::from_secs(60))
///     .build();
/// assert_eq!(config.max_workers, 4);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Number of concurrent executions the worker pool admits.
    pub max_workers: usize,

    /// Default retry cap for jobs that don't specify their own.
    pub max_retries: i32,

    /// Base of the exponential retry delay.
    pub retry_backoff_base: f64,

    /// Per-execution deadline.
    pub job_timeout: Duration,

    /// Sleep between polls when the queue is empty.
    pub poll_interval: Duration,

    /// Whether the fast tier is used; when false the queue runs on store
    /// scans alone.
    pub use_fast_queue: bool,

    /// Maximum jobs accepted per bulk submission.
    pub bulk_submit_cap: usize,

    /// How long shutdown waits for in-flight jobs before interrupting them.
    pub shutdown_grace: Duration,
}

const DEFAULT_CONFIG: Config = Config {
    max_workers: 10,
    max_retries: 5,
    retry_backoff_base: 2.0,
    job_timeout: Duration::from_secs(300),
    poll_interval: Duration::from_secs(1),
    use_fast_queue: true,
    bulk_submit_cap: 100,
    shutdown_grace: Duration::from_secs(30),
};

impl Config {
    /// Create a new builder.
    pub const fn builder() -> Builder {
        Builder::new()
    }
}

impl Default for Config {
    fn default() -> Self {
        DEFAULT_CONFIG
    }
}

/// A builder for [`Config`].
#[derive(Debug)]
pub struct Builder {
    inner: Config,
}

impl Builder {
    /// Creates a new `Builder` with the default options.
    pub const fn new() -> Self {
        Self {
            inner: DEFAULT_CONFIG,
        }
    }

    /// Sets the worker pool size.
    ///
    /// Default value is `10`.
    pub const fn max_workers(mut self, max_workers: usize) -> Self {
        self.inner.max_workers = max_workers;
        self
    }

    /// Sets the default retry cap.
    ///
    /// Default value is `5`.
    pub const fn max_retries(mut self, max_retries: i32) -> Self {
        self.inner.max_retries = max_retries;
        self
    }

    /// Sets the base of the exponential retry delay.
    ///
    /// Default value is `2.0`.
    pub const fn retry_backoff_base(mut self, retry_backoff_base: f64) -> Self {
        self.inner.retry_backoff_base = retry_backoff_base;
        self
    }

    /// Sets the per-execution deadline.
    ///
    /// Default value is five minutes.
    pub const fn job_timeout(mut self, job_timeout: Duration) -> Self {
        self.inner.job_timeout = job_timeout;
        self
    }

    /// Sets the idle-poll cadence.
    ///
    /// Default value is one second.
    pub const fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.inner.poll_interval = poll_interval;
        self
    }

    /// Enables or disables the fast tier.
    ///
    /// Enabled by default.
    pub const fn use_fast_queue(mut self, use_fast_queue: bool) -> Self {
        self.inner.use_fast_queue = use_fast_queue;
        self
    }

    /// Sets the bulk submission cap.
    ///
    /// Default value is `100`.
    pub const fn bulk_submit_cap(mut self, bulk_submit_cap: usize) -> Self {
        self.inner.bulk_submit_cap = bulk_submit_cap;
        self
    }

    /// Sets the shutdown grace period.
    ///
    /// Default value is thirty seconds.
    pub const fn shutdown_grace(mut self, shutdown_grace: Duration) -> Self {
        self.inner.shutdown_grace = shutdown_grace;
        self
    }

    /// Builds the `Config` with the configured options.
    pub const fn build(self) -> Config {
        self.inner
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}
