//! Task execution: worker pool, result handles, instrumentation.
//!
//! Two layers share one submission surface. [`WorkerPool`] owns the ring and
//! the worker threads; [`InstrumentedPool`] wraps it with latency timing and
//! success/failure counters. Both hand back a [`TaskHandle`] that resolves
//! exactly once to the task's value or its captured failure.

mod error;
mod handle;
mod instrumented;
mod worker;

pub use error::{EnqueueError, TaskError};
pub use handle::TaskHandle;
pub use instrumented::InstrumentedPool;
pub use worker::{WorkerPool, DEFAULT_QUEUE_CAPACITY, ENQUEUE_RETRY_BUDGET};

pub(crate) use error::panic_message;
