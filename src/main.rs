//! Demo: instrumented pool under a mixed workload with live metrics.
//!
//! Run this, then in another terminal:
//!
//! ```text
//! curl http://localhost:9090/metrics
//! curl http://localhost:9090/health
//! ```

use std::io::{self, BufRead};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use taskring_rs::net::DEFAULT_METRICS_PORT;
use taskring_rs::{InstrumentedPool, MetricsRegistry, MetricsServer};

const NUM_TASKS: u32 = 500;

/// XorShift64: enough randomness to shape a demo workload, no dependency,
/// and deterministic across runs.
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        // Avoid the all-zero lockup state.
        let state = if seed == 0 { 0x9E3779B97F4A7C15 } else { seed };
        Self { state }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    fn next_below(&mut self, upper: u64) -> u64 {
        self.next_u64() % upper
    }
}

fn main() {
    println!("taskring demo: instrumented pool with live metrics");
    println!();

    let registry = Arc::new(MetricsRegistry::new());
    let pool = InstrumentedPool::with_registry(4, Arc::clone(&registry));

    let mut metrics_server = MetricsServer::new(Arc::clone(&registry), DEFAULT_METRICS_PORT);
    match metrics_server.start() {
        Ok(()) => {
            println!(
                "metrics server running at http://localhost:{}/metrics",
                metrics_server.port()
            );
            println!("health probe          at http://localhost:{}/health", metrics_server.port());
        }
        Err(err) => {
            eprintln!("metrics server failed to start: {err} (continuing without HTTP endpoint)");
        }
    }
    println!();

    // Mixed workload: 0-10ms tasks, ~5% deliberate failures.
    let mut rng = XorShift64::new(42);
    println!("submitting {NUM_TASKS} tasks...");

    for i in 0..NUM_TASKS {
        let duration_ms = rng.next_below(11);
        let should_fail = rng.next_below(20) == 0;

        let submitted = pool.enqueue(move || -> u32 {
            thread::sleep(Duration::from_millis(duration_ms));
            if should_fail {
                panic!("task {i} failed");
            }
            i * 2
        });
        if let Err(err) = submitted {
            eprintln!("enqueue failed: {err}");
            break;
        }

        if (i + 1) % 100 == 0 {
            println!(
                "  [{}/{NUM_TASKS}] submitted={} completed={} failed={} queue_depth={}",
                i + 1,
                pool.tasks_submitted(),
                pool.tasks_completed(),
                pool.tasks_failed(),
                pool.queue_depth()
            );
        }
    }

    pool.wait_all();

    println!();
    println!("final counts");
    println!("  tasks submitted: {}", pool.tasks_submitted());
    println!("  tasks completed: {}", pool.tasks_completed());
    println!("  tasks failed:    {}", pool.tasks_failed());
    println!(
        "  error rate:      {:.1}%",
        100.0 * pool.tasks_failed() as f64 / pool.tasks_submitted() as f64
    );

    println!();
    println!("raw /metrics output:");
    println!("{}", registry.serialize());

    println!("press Enter to stop the metrics server...");
    let mut line = String::new();
    let _ = io::stdin().lock().read_line(&mut line);

    metrics_server.stop();
}
