//! Handlers perform the actual work of a job.
//!
//! A handler is registered per job type and receives the job's payload,
//! deserialized into its declared input type, along with the deadline by
//! which it must finish. The engine owns everything around the call —
//! claiming, timeouts, retries, bookkeeping — while the handler body stays a
//! plain async function over its own types.
//!
//! # Implementing `Handler`
//!
//! ```rust
//! use serde::Deserialize;
//! use serde_json::json;
//! use taskmill::{handler::Result as HandlerResult, Handler, Timestamp};
//!
//! #[derive(Deserialize)]
//! struct WelcomeEmail {
//!     to: String,
//! }
//!
//! struct SendWelcomeEmail;
//!
//! impl Handler for SendWelcomeEmail {
//!     const JOB_TYPE: &'static str = "email";
//!
//!     type Payload = WelcomeEmail;
//!     type Output = serde_json::Value;
//!
//!     async fn execute(
//!         &self,
//!         payload: Self::Payload,
//!         _deadline: Timestamp,
//!     ) -> HandlerResult<Self::Output> {
//!         // Here you would integrate with an email service.
//!         Ok(json!({ "status": "sent", "to": payload.to }))
//!     }
//! }
//! ```

use std::{collections::HashMap, fmt, future::Future, pin::Pin, sync::Arc};

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::timestamp::Timestamp;

/// A type alias for handler results.
pub type Result<T> = std::result::Result<T, Error>;

/// A handler failure.
///
/// The message is recorded on the job row as its last failure reason; the
/// engine decides whether the job retries.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct Error {
    message: String,
}

impl Error {
    /// Creates a failure from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Creates a failure from any displayable error.
    pub fn from_display(err: impl fmt::Display) -> Self {
        Self::new(err.to_string())
    }
}

/// Trait for defining job handlers.
///
/// The registry operates over types that implement this trait.
pub trait Handler: Send + Sync + 'static {
    /// The job type this handler processes.
    const JOB_TYPE: &'static str;

    /// The payload type the execute method will take.
    ///
    /// Payloads are stored as JSON; deserialization failures are reported as
    /// ordinary handler failures.
    type Payload: DeserializeOwned + Send;

    /// The output type the execute method will return upon success.
    type Output: Serialize + Send;

    /// Executes the handler with the provided payload.
    ///
    /// `deadline` is the instant at which the engine abandons this
    /// execution; handlers doing their own pacing may consult it.
    fn execute(
        &self,
        payload: Self::Payload,
        deadline: Timestamp,
    ) -> impl Future<Output = Result<Self::Output>> + Send;
}

pub(crate) trait ErasedHandler: Send + Sync {
    fn job_type(&self) -> &'static str;

    fn execute_json<'a>(
        &'a self,
        payload: Value,
        deadline: Timestamp,
    ) -> Pin<Box<dyn Future<Output = Result<Value>> + Send + 'a>>;
}

struct Registered<H: Handler> {
    inner: H,
}

impl<H: Handler> ErasedHandler for Registered<H> {
    fn job_type(&self) -> &'static str {
        H::JOB_TYPE
    }

    fn execute_json<'a>(
        &'a self,
        payload: Value,
        deadline: Timestamp,
    ) -> Pin<Box<dyn Future<Output = Result<Value>> + Send + 'a>> {
        Box::pin(async move {
            let payload: H::Payload = serde_json::from_value(payload).map_err(|err| {
                Error::new(format!(
                    "malformed payload for job type `{}`: {err}",
                    H::JOB_TYPE
                ))
            })?;

            let output = self.inner.execute(payload, deadline).await?;

            serde_json::to_value(output).map_err(|err| {
                Error::new(format!(
                    "unserializable output for job type `{}`: {err}",
                    H::JOB_TYPE
                ))
            })
        })
    }
}

/// Maps job types to the handlers that process them.
///
/// Populated once at startup; the engine resolves a handler here for every
/// claimed job.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn ErasedHandler>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler under its job type.
    ///
    /// Registering a second handler for the same job type replaces the
    /// first.
    pub fn register<H: Handler>(&mut self, handler: H) {
        self.handlers.insert(
            H::JOB_TYPE.to_string(),
            Arc::new(Registered { inner: handler }),
        );
    }

    /// Whether a handler is registered for the given job type.
    pub fn contains(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    /// Whether any handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub(crate) fn get(&self, job_type: &str) -> Option<Arc<dyn ErasedHandler>> {
        self.handlers.get(job_type).cloned()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("job_types", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
