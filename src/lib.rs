//! Bounded lock-free task executor with Prometheus observability.
//!
//! Callers submit closures and get back handles to their eventual results; a
//! fixed set of worker threads drains a bounded lock-free ring to run them.
//! Every submission is instrumented (latency, traffic, errors, saturation)
//! and the metrics serialize to the Prometheus text format. A small TCP
//! frontend lets remote clients feed the same executor.
//!
//! Layers, bottom up:
//!
//! 1. [`stdx::MpmcRing`]: bounded MPMC ring with per-slot sequence numbers;
//!    wait-free enqueue/dequeue fast paths, cache-padded throughout.
//! 2. [`WorkerPool`]: worker threads over the ring, with spin-then-yield
//!    idle behavior, drain-on-shutdown, and a `wait_all` quiescence barrier.
//! 3. [`MetricsRegistry`] and friends: counters, gauges, histograms, and
//!    their Prometheus exposition.
//! 4. [`InstrumentedPool`]: the pool wrapped in per-task metrics, with a
//!    two-phase `wait_all` so counter reads after the barrier are exact.
//! 5. [`net`]: length-prefixed TCP protocol, task server/client, and the
//!    `/metrics` HTTP endpoint.
//!
//! The queue is bounded on purpose: a full ring surfaces as an explicit
//! `QueueFull` error after a bounded retry loop, never as unbounded
//! buffering. Task panics are captured into the task's handle and counted;
//! workers are never lost to user code.
//!
//! # Quick start
//!
//! ```no_run
//! use taskring_rs::InstrumentedPool;
//!
//! let pool = InstrumentedPool::new(4);
//! let handle = pool.enqueue(|| 21 * 2).unwrap();
//! assert_eq!(handle.join().unwrap(), 42);
//!
//! pool.wait_all();
//! assert_eq!(pool.tasks_submitted(), pool.tasks_completed());
//! println!("{}", pool.registry().serialize());
//! ```

pub mod metrics;
pub mod net;
pub mod pool;
pub mod stdx;

pub use metrics::{Counter, Gauge, Histogram, MetricsRegistry};
pub use net::{ClientError, MetricsServer, TaskClient, TaskServer};
pub use pool::{
    EnqueueError, InstrumentedPool, TaskError, TaskHandle, WorkerPool, DEFAULT_QUEUE_CAPACITY,
    ENQUEUE_RETRY_BUDGET,
};
pub use stdx::MpmcRing;
