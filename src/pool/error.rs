//! Error types for the worker pool.
//!
//! Errors are split by surface: submission failures come back synchronously
//! from `enqueue`, task failures are captured into the task's handle. The
//! enums are hand-rolled so variants can carry exactly the context the
//! caller needs and nothing else.

use std::any::Any;
use std::fmt;

/// Failure to place a task on the queue.
#[derive(Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum EnqueueError {
    /// The ring stayed full for the whole retry budget. The task was not
    /// submitted; the caller decides whether to shed, retry, or back off.
    QueueFull {
        /// Number of cooperative-yield retries that were attempted.
        retries: u32,
    },
    /// The pool has begun shutting down and accepts no new work.
    PoolStopped,
}

impl fmt::Display for EnqueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueFull { retries } => {
                write!(f, "queue full after {retries} enqueue retries")
            }
            Self::PoolStopped => write!(f, "enqueue on a stopped pool"),
        }
    }
}

impl std::error::Error for EnqueueError {}

/// Failure of a submitted task, observed through its [`TaskHandle`].
///
/// [`TaskHandle`]: super::TaskHandle
#[derive(Debug)]
#[non_exhaustive]
pub enum TaskError {
    /// The task panicked; the payload is stringified here. The worker that
    /// ran the task is unaffected.
    Panicked {
        /// Panic payload rendered to text.
        message: String,
    },
    /// The task was dropped before it ran. Unreachable while the pool's
    /// run-to-completion shutdown holds; kept so a handle can never hang.
    Abandoned,
}

impl TaskError {
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        Self::Panicked {
            message: panic_message(&payload),
        }
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Panicked { message } => write!(f, "task panicked: {message}"),
            Self::Abandoned => write!(f, "task dropped before it ran"),
        }
    }
}

impl std::error::Error for TaskError {}

/// Render a panic payload to text. Panics raised via `panic!` carry either a
/// `&'static str` or a `String`; anything else gets a fixed fallback.
pub(crate) fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
