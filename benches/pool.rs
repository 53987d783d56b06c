//! Worker-pool throughput: plain pool, instrumented pool, and a
//! mutex+condvar baseline pool for contrast.

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use taskring_rs::{InstrumentedPool, WorkerPool};

const TASKS_PER_ITER: u64 = 1_000;

// ============================================================================
// Baseline: mutex + condvar pool
// ============================================================================

type BaselineJob = Box<dyn FnOnce() + Send + 'static>;

struct BaselineState {
    queue: Mutex<(VecDeque<BaselineJob>, bool)>,
    available: Condvar,
}

/// The pool the lock-free version replaces: one mutex around the queue, a
/// condvar parking idle workers.
struct BaselinePool {
    state: Arc<BaselineState>,
    workers: Vec<thread::JoinHandle<()>>,
    pending: Arc<(Mutex<u64>, Condvar)>,
}

impl BaselinePool {
    fn new(threads: usize) -> Self {
        let state = Arc::new(BaselineState {
            queue: Mutex::new((VecDeque::new(), false)),
            available: Condvar::new(),
        });
        let pending = Arc::new((Mutex::new(0u64), Condvar::new()));

        let workers = (0..threads)
            .map(|_| {
                let state = Arc::clone(&state);
                let pending = Arc::clone(&pending);
                thread::spawn(move || loop {
                    let job = {
                        let mut guard = state.queue.lock().unwrap();
                        loop {
                            if let Some(job) = guard.0.pop_front() {
                                break job;
                            }
                            if guard.1 {
                                return;
                            }
                            guard = state.available.wait(guard).unwrap();
                        }
                    };
                    job();
                    let mut count = pending.0.lock().unwrap();
                    *count -= 1;
                    if *count == 0 {
                        pending.1.notify_all();
                    }
                })
            })
            .collect();

        Self {
            state,
            workers,
            pending,
        }
    }

    fn enqueue(&self, job: BaselineJob) {
        *self.pending.0.lock().unwrap() += 1;
        self.state.queue.lock().unwrap().0.push_back(job);
        self.state.available.notify_one();
    }

    fn wait_all(&self) {
        let mut count = self.pending.0.lock().unwrap();
        while *count > 0 {
            count = self.pending.1.wait(count).unwrap();
        }
    }
}

impl Drop for BaselinePool {
    fn drop(&mut self) {
        self.state.queue.lock().unwrap().1 = true;
        self.state.available.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

// ============================================================================
// Benchmarks
// ============================================================================

fn bench_pools(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool_throughput");
    group.sample_size(10);
    group.throughput(Throughput::Elements(TASKS_PER_ITER));

    group.bench_function("worker_pool", |b| {
        let pool = WorkerPool::new(4);
        b.iter(|| {
            for _ in 0..TASKS_PER_ITER {
                loop {
                    if pool.enqueue(|| {}).is_ok() {
                        break;
                    }
                }
            }
            pool.wait_all();
        });
    });

    group.bench_function("instrumented_pool", |b| {
        let pool = InstrumentedPool::new(4);
        b.iter(|| {
            for _ in 0..TASKS_PER_ITER {
                loop {
                    if pool.enqueue(|| {}).is_ok() {
                        break;
                    }
                }
            }
            pool.wait_all();
        });
    });

    group.bench_function("mutex_condvar_pool", |b| {
        let pool = BaselinePool::new(4);
        b.iter(|| {
            for _ in 0..TASKS_PER_ITER {
                pool.enqueue(Box::new(|| {}));
            }
            pool.wait_all();
        });
    });

    group.finish();
}

criterion_group!(benches, bench_pools);
criterion_main!(benches);
