//! Worker pool over the bounded MPMC ring.
//!
//! # Design
//!
//! N OS threads drain one shared [`MpmcRing`] of type-erased jobs. There is
//! no condition variable on the hot path: idle workers spin briefly with a
//! CPU pause hint, then cooperatively yield their timeslice. The queue is
//! bounded on purpose: a full ring is backpressure surfaced to the
//! submitter, not an invitation to buffer without limit.
//!
//! # Active-task accounting
//!
//! `active_tasks` counts jobs that have been dequeued but whose execution
//! has not finished. The increment happens *before* the job runs and the
//! decrement after; [`WorkerPool::wait_all`] polls
//! `ring empty && active == 0`, so flipping that order opens a window where
//! `wait_all` returns while a just-dequeued job is about to run.
//!
//! # Shutdown
//!
//! `shutdown` (also run by `Drop`) sets the stop flag and joins the workers.
//! Workers drain the ring before exiting: a committed job always runs, so a
//! pending [`TaskHandle`] never dangles across pool teardown.
//!
//! [`TaskHandle`]: super::TaskHandle

use std::hint;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crate::stdx::MpmcRing;

use super::error::{EnqueueError, TaskError};
use super::handle::{handle_pair, TaskHandle};

/// Type-erased unit of work, queued on the ring.
pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// Ring capacity used by [`WorkerPool::new`].
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Cooperative-yield retries before `enqueue` reports a full queue.
pub const ENQUEUE_RETRY_BUDGET: u32 = 1000;

/// Spin iterations before an idle worker yields its timeslice.
const IDLE_SPIN_COUNT: u32 = 64;

/// State shared between the pool facade and its worker threads.
pub(crate) struct PoolShared {
    queue: MpmcRing<Job>,
    stop: AtomicBool,
    /// Jobs dequeued but not yet finished. See the module docs for the
    /// ordering contract this counter carries.
    active_tasks: AtomicUsize,
    total_enqueued: AtomicU64,
    total_completed: AtomicU64,
}

impl PoolShared {
    pub(crate) fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    fn submit(&self, job: Job) -> Result<(), EnqueueError> {
        if self.stop.load(Ordering::Acquire) {
            return Err(EnqueueError::PoolStopped);
        }

        let mut job = job;
        let mut retries = 0u32;
        loop {
            match self.queue.try_enqueue(job) {
                Ok(()) => break,
                Err(rejected) => {
                    if self.stop.load(Ordering::Acquire) {
                        return Err(EnqueueError::PoolStopped);
                    }
                    retries += 1;
                    if retries > ENQUEUE_RETRY_BUDGET {
                        return Err(EnqueueError::QueueFull {
                            retries: ENQUEUE_RETRY_BUDGET,
                        });
                    }
                    job = rejected;
                    thread::yield_now();
                }
            }
        }

        self.total_enqueued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

fn worker_loop(shared: &PoolShared) {
    loop {
        if let Some(job) = shared.queue.try_dequeue() {
            // Counted before the job runs; wait_all depends on this order.
            shared.active_tasks.fetch_add(1, Ordering::AcqRel);
            job();
            shared.active_tasks.fetch_sub(1, Ordering::AcqRel);
            shared.total_completed.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        if shared.stop.load(Ordering::Acquire) && shared.queue.is_empty() {
            return;
        }

        // Brief spin keeps quiet-to-busy transitions in userspace; the
        // emptiness probe between pauses cuts the latency of a fresh job.
        for _ in 0..IDLE_SPIN_COUNT {
            hint::spin_loop();
            if !shared.queue.is_empty() {
                break;
            }
        }
        thread::yield_now();
    }
}

/// Bounded thread pool executing submitted closures.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    workers: Vec<thread::JoinHandle<()>>,
    threads: usize,
}

impl WorkerPool {
    /// Create a pool with `threads` workers and the default ring capacity.
    ///
    /// # Panics
    ///
    /// Panics if `threads` is zero.
    pub fn new(threads: usize) -> Self {
        Self::with_queue_capacity(threads, DEFAULT_QUEUE_CAPACITY)
    }

    /// Create a pool with an explicit ring capacity (power of two `>= 2`).
    ///
    /// # Panics
    ///
    /// Panics if `threads` is zero or the capacity is invalid.
    pub fn with_queue_capacity(threads: usize, queue_capacity: usize) -> Self {
        assert!(threads >= 1, "worker pool needs at least one thread");

        let shared = Arc::new(PoolShared {
            queue: MpmcRing::with_capacity(queue_capacity),
            stop: AtomicBool::new(false),
            active_tasks: AtomicUsize::new(0),
            total_enqueued: AtomicU64::new(0),
            total_completed: AtomicU64::new(0),
        });

        let workers = (0..threads)
            .map(|index| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("taskring-worker-{index}"))
                    .spawn(move || worker_loop(&shared))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Self {
            shared,
            workers,
            threads,
        }
    }

    /// Submit a closure; returns a handle to its eventual result.
    ///
    /// A panic inside `f` is captured into the handle; the worker survives
    /// and the panic resurfaces as [`TaskError::Panicked`] on `join`.
    ///
    /// Backpressure: while the ring is full the calling thread yields and
    /// retries, up to [`ENQUEUE_RETRY_BUDGET`] times, then fails with
    /// [`EnqueueError::QueueFull`]. After shutdown has begun the call fails
    /// with [`EnqueueError::PoolStopped`].
    pub fn enqueue<F, R>(&self, f: F) -> Result<TaskHandle<R>, EnqueueError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (handle, slot) = handle_pair();
        self.submit(Box::new(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(f)).map_err(TaskError::from_panic);
            slot.deliver(result);
        }))?;
        Ok(handle)
    }

    /// Submit an already-erased job. The instrumented pool uses this to
    /// queue its own wrappers without a second layer of handle plumbing.
    pub(crate) fn submit(&self, job: Job) -> Result<(), EnqueueError> {
        self.shared.submit(job)
    }

    pub(crate) fn shared_handle(&self) -> Arc<PoolShared> {
        Arc::clone(&self.shared)
    }

    /// Block until the ring is empty and no job is in flight.
    pub fn wait_all(&self) {
        while !self.shared.queue.is_empty() || self.shared.active_tasks.load(Ordering::Acquire) > 0
        {
            thread::yield_now();
        }
    }

    /// Begin shutdown and join all workers. Queued jobs are drained, not
    /// dropped. Idempotent; `Drop` calls this.
    pub fn shutdown(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }

    // --- monitoring snapshots ---

    /// Approximate number of queued jobs.
    pub fn queue_depth(&self) -> usize {
        self.shared.queue.len()
    }

    /// Jobs currently executing.
    pub fn active_count(&self) -> usize {
        self.shared.active_tasks.load(Ordering::Acquire)
    }

    /// Jobs accepted by the ring since construction.
    pub fn total_enqueued(&self) -> u64 {
        self.shared.total_enqueued.load(Ordering::Relaxed)
    }

    /// Jobs fully executed since construction.
    pub fn total_completed(&self) -> u64 {
        self.shared.total_completed.load(Ordering::Relaxed)
    }

    pub fn thread_count(&self) -> usize {
        self.threads
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
