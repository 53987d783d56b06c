//! Instrumented pool: the worker pool wrapped in golden-signal metrics.
//!
//! Every submission is wrapped in a closure that times end-to-end latency
//! (submit to completion), counts successes and failures, and keeps the
//! queue-depth and active-worker gauges fresh. The metric names match the
//! Prometheus exposition the HTTP endpoint serves.
//!
//! # wait_all correctness
//!
//! The inner pool's `wait_all` unblocks when its active-task counter hits
//! zero. But that decrement happens inside the worker loop, while this
//! layer's counters are updated inside the wrapper. A reader polling the
//! counters right after the inner `wait_all` can therefore observe a count
//! that is still off by the tasks whose bookkeeping hasn't landed. The fix
//! is a second phase: spin until `completed + failed` catches up with
//! `submitted`. Only then are the counters guaranteed consistent.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crate::metrics::{Counter, Gauge, Histogram, MetricsRegistry};

use super::error::{EnqueueError, TaskError};
use super::handle::{handle_pair, TaskHandle};
use super::worker::{WorkerPool, DEFAULT_QUEUE_CAPACITY};

/// Worker pool with per-task observability.
///
/// Same submission surface as [`WorkerPool`], plus metric getters and a
/// registry that an HTTP endpoint can serialize.
pub struct InstrumentedPool {
    pool: WorkerPool,
    registry: Arc<MetricsRegistry>,

    tasks_submitted: Arc<Counter>,
    tasks_completed: Arc<Counter>,
    tasks_failed: Arc<Counter>,
    queue_depth: Arc<Gauge>,
    active_workers: Arc<Gauge>,
    thread_count: Arc<Gauge>,
    task_latency: Arc<Histogram>,
}

impl InstrumentedPool {
    /// Create a pool with a private registry.
    pub fn new(threads: usize) -> Self {
        Self::with_registry(threads, Arc::new(MetricsRegistry::new()))
    }

    /// Create a pool registering its metrics into `registry`.
    pub fn with_registry(threads: usize, registry: Arc<MetricsRegistry>) -> Self {
        Self::with_queue_capacity(threads, DEFAULT_QUEUE_CAPACITY, registry)
    }

    /// Create a pool with an explicit ring capacity.
    pub fn with_queue_capacity(
        threads: usize,
        queue_capacity: usize,
        registry: Arc<MetricsRegistry>,
    ) -> Self {
        let pool = WorkerPool::with_queue_capacity(threads, queue_capacity);

        let tasks_submitted = registry.register_counter(
            "threadpool_tasks_submitted_total",
            "Total number of tasks submitted to the thread pool",
        );
        let tasks_completed = registry.register_counter(
            "threadpool_tasks_completed_total",
            "Total number of tasks that completed successfully",
        );
        let tasks_failed = registry.register_counter(
            "threadpool_tasks_failed_total",
            "Total number of tasks that raised a failure",
        );
        let queue_depth = registry.register_gauge(
            "threadpool_queue_depth_current",
            "Current number of tasks waiting in the queue",
        );
        let active_workers = registry.register_gauge(
            "threadpool_active_workers_current",
            "Current number of threads actively executing tasks",
        );
        let thread_count = registry.register_gauge(
            "threadpool_thread_count",
            "Total number of worker threads in the pool",
        );
        thread_count.set(threads as i64);
        let task_latency = registry.register_histogram(
            "threadpool_task_latency_seconds",
            "End-to-end task latency from submission to completion",
        );

        Self {
            pool,
            registry,
            tasks_submitted,
            tasks_completed,
            tasks_failed,
            queue_depth,
            active_workers,
            thread_count,
            task_latency,
        }
    }

    /// Submit a closure with full instrumentation.
    ///
    /// The wrapper, when a worker runs it: bumps the active-workers gauge,
    /// refreshes queue depth, runs `f` under `catch_unwind`, delivers the
    /// outcome to the handle, observes latency, bumps the completed or
    /// failed counter, and only then decrements the active-workers gauge.
    /// Phase two of [`wait_all`] reads the counters, so they must be
    /// committed before the task stops looking active.
    ///
    /// [`wait_all`]: InstrumentedPool::wait_all
    pub fn enqueue<F, R>(&self, f: F) -> Result<TaskHandle<R>, EnqueueError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let submit_time = Instant::now();
        let (handle, slot) = handle_pair();

        let shared = self.pool.shared_handle();
        let active_workers = Arc::clone(&self.active_workers);
        let queue_depth = Arc::clone(&self.queue_depth);
        let completed = Arc::clone(&self.tasks_completed);
        let failed = Arc::clone(&self.tasks_failed);
        let latency = Arc::clone(&self.task_latency);

        self.pool.submit(Box::new(move || {
            active_workers.inc();
            queue_depth.set(shared.queue_depth() as i64);

            let result = panic::catch_unwind(AssertUnwindSafe(f)).map_err(TaskError::from_panic);
            let succeeded = result.is_ok();
            slot.deliver(result);

            latency.observe_since(submit_time);
            if succeeded {
                completed.inc();
            } else {
                failed.inc();
            }

            active_workers.dec();
            queue_depth.set(shared.queue_depth() as i64);
        }))?;

        // Counted only once the ring accepts the task: a rejected enqueue
        // must not leave wait_all waiting for a completion that can't come.
        self.tasks_submitted.inc();
        self.queue_depth.set(self.pool.queue_depth() as i64);
        Ok(handle)
    }

    /// Block until every submitted task has fully finished, including its
    /// metric bookkeeping.
    ///
    /// Phase 1 drains the inner pool. Phase 2 spins until
    /// `completed + failed` reaches `submitted`, closing the window where a
    /// worker finished executing but the wrapper's counter updates haven't
    /// landed. Counter reads immediately after this call are consistent.
    pub fn wait_all(&self) {
        self.pool.wait_all();

        let submitted = self.tasks_submitted.get();
        while self.tasks_completed.get() + self.tasks_failed.get() < submitted {
            thread::yield_now();
        }

        self.queue_depth.set(0);
        self.active_workers.set(0);
    }

    // --- metric snapshots ---

    pub fn tasks_submitted(&self) -> u64 {
        self.tasks_submitted.get()
    }

    pub fn tasks_completed(&self) -> u64 {
        self.tasks_completed.get()
    }

    pub fn tasks_failed(&self) -> u64 {
        self.tasks_failed.get()
    }

    pub fn queue_depth(&self) -> usize {
        self.pool.queue_depth()
    }

    pub fn active_workers(&self) -> usize {
        self.pool.active_count()
    }

    pub fn thread_count(&self) -> usize {
        self.pool.thread_count()
    }

    /// End-to-end latency histogram, for direct reads in tests and demos.
    pub fn task_latency(&self) -> &Arc<Histogram> {
        &self.task_latency
    }

    /// The registry holding this pool's metrics.
    pub fn registry(&self) -> &Arc<MetricsRegistry> {
        &self.registry
    }
}
