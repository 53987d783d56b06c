//! Minimal HTTP/1.1 endpoint for Prometheus scrapes.
//!
//! Serves exactly three routes:
//!
//! - `GET /metrics`: the registry's exposition text,
//!   `Content-Type: text/plain; version=0.0.4`
//! - `GET /health`: `OK` (liveness probe)
//! - anything else: 404 with a hint
//!
//! One background thread handles connections inline; scrapes arrive every
//! few seconds at most, so there is nothing to parallelize. Responses close
//! the connection (`Connection: close`), which keeps the handler a single
//! read-respond exchange.

use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::metrics::MetricsRegistry;

/// Prometheus's conventional scrape port.
pub const DEFAULT_METRICS_PORT: u16 = 9090;

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// HTTP server exposing a [`MetricsRegistry`].
pub struct MetricsServer {
    registry: Arc<MetricsRegistry>,
    port: u16,
    running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl MetricsServer {
    /// Create a server for `registry`; port 0 picks an ephemeral port at
    /// `start()`.
    pub fn new(registry: Arc<MetricsRegistry>, port: u16) -> Self {
        Self {
            registry,
            port,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    /// Bind and begin serving in a background thread.
    pub fn start(&mut self) -> io::Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", self.port))?;
        self.port = listener.local_addr()?.port();
        listener.set_nonblocking(true)?;
        self.running.store(true, Ordering::Release);

        let running = Arc::clone(&self.running);
        let registry = Arc::clone(&self.registry);

        let thread = thread::Builder::new()
            .name("taskring-metrics".to_string())
            .spawn(move || {
                while running.load(Ordering::Acquire) {
                    match listener.accept() {
                        Ok((stream, _peer)) => handle_connection(stream, &registry),
                        Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                            thread::sleep(ACCEPT_POLL_INTERVAL);
                        }
                        Err(_) => {
                            if !running.load(Ordering::Acquire) {
                                break;
                            }
                        }
                    }
                }
            })
            .expect("failed to spawn metrics server thread");

        self.thread = Some(thread);
        Ok(())
    }

    /// Stop serving and join the background thread. Idempotent.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    /// The bound port (the OS-assigned one when constructed with port 0).
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for MetricsServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn handle_connection(mut stream: TcpStream, registry: &MetricsRegistry) {
    let _ = stream.set_read_timeout(Some(REQUEST_READ_TIMEOUT));

    // One read is enough: the request line arrives in the first segment and
    // nothing past it matters for routing.
    let mut buf = [0u8; 1024];
    let n = match stream.read(&mut buf) {
        Ok(n) if n > 0 => n,
        _ => return,
    };
    let request = String::from_utf8_lossy(&buf[..n]);

    let response = if request.starts_with("GET /metrics") {
        http_response("200 OK", "text/plain; version=0.0.4", &registry.serialize())
    } else if request.starts_with("GET /health") {
        http_response("200 OK", "text/plain", "OK\n")
    } else {
        http_response("404 Not Found", "text/plain", "Endpoints: /metrics, /health\n")
    };

    let _ = stream.write_all(response.as_bytes());
}

fn http_response(status: &str, content_type: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_has_content_length_and_close() {
        let response = http_response("200 OK", "text/plain", "OK\n");
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("Content-Length: 3\r\n"));
        assert!(response.contains("Connection: close\r\n"));
        assert!(response.ends_with("\r\n\r\nOK\n"));
    }
}
