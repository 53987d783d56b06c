//! Task server demo: framed task execution on :8080, metrics on :9090.
//!
//! Run this, then in another terminal:
//!
//! ```text
//! cargo run --bin task_client
//! curl http://localhost:9090/metrics
//! ```

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use taskring_rs::net::DEFAULT_METRICS_PORT;
use taskring_rs::{MetricsRegistry, MetricsServer, TaskServer};

const TASK_PORT: u16 = 8080;

/// Pull one metric's value line out of the exposition text.
fn extract(page: &str, name: &str) -> String {
    page.lines()
        .find(|line| {
            line.strip_prefix(name)
                .is_some_and(|rest| rest.starts_with(' '))
        })
        .and_then(|line| line.split(' ').nth(1))
        .unwrap_or("?")
        .to_string()
}

fn main() {
    println!("taskring task server");
    println!();

    let registry = Arc::new(MetricsRegistry::new());

    // The handler is what the server does with each task payload. Here:
    // simulated work proportional to input size, explicit failures on demand.
    let handler: taskring_rs::net::Handler = Arc::new(|input: &str| {
        let duration_ms = (input.len() as u64 * 2).min(50);
        thread::sleep(Duration::from_millis(duration_ms));

        if input.contains("fail") {
            return Err("task explicitly requested failure".into());
        }

        Ok(format!(
            "processed: [{input}] len={} duration={duration_ms}ms",
            input.len()
        ))
    });

    let mut task_server = TaskServer::new(TASK_PORT, handler, &registry, 4);
    if let Err(err) = task_server.start() {
        eprintln!("task server failed to start on :{TASK_PORT}: {err}");
        return;
    }
    println!("task server    -> localhost:{}", task_server.port());

    let mut metrics_server = MetricsServer::new(Arc::clone(&registry), DEFAULT_METRICS_PORT);
    match metrics_server.start() {
        Ok(()) => {
            println!("metrics server -> http://localhost:{}/metrics", metrics_server.port());
            println!("health probe   -> http://localhost:{}/health", metrics_server.port());
        }
        Err(err) => eprintln!("metrics server failed: {err}"),
    }

    println!();
    println!("waiting for clients... (Ctrl+C to stop)");
    println!("run 'cargo run --bin task_client' in another terminal to test.");
    println!();

    loop {
        thread::sleep(Duration::from_secs(5));

        let page = registry.serialize();
        println!(
            "[snapshot] requests={} errors={} active_conns={} pool_completed={}",
            extract(&page, "server_requests_total"),
            extract(&page, "server_request_errors_total"),
            extract(&page, "server_connections_active_current"),
            extract(&page, "threadpool_tasks_completed_total"),
        );
    }
}
