//! TCP task execution server.
//!
//! Accepts framed task requests, runs them through the instrumented pool's
//! handler, and replies on the same connection. Each accepted connection is
//! itself a pool task: the worker that dequeues it owns the connection until
//! the client disconnects.
//!
//! # Ports
//!
//! Pass port 0 to let the OS pick a free ephemeral port; [`TaskServer::port`]
//! reports the bound port after `start()`. Tests rely on this; hardcoded
//! ports collide.
//!
//! # Shutdown
//!
//! `stop()` flips the running flag and joins the accept thread. The accept
//! loop polls a nonblocking listener, and connection tasks wait for frames
//! with a bounded poll, so both notice the flag without any fd tricks.

use std::io;
use std::net::{TcpListener, TcpStream};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::metrics::{Counter, Gauge, Histogram, MetricsRegistry};
use crate::pool::{panic_message, InstrumentedPool};

use super::protocol::{read_message, write_message, Message, MessageKind, ProtocolError};

/// How often an idle connection or the accept loop re-checks the running flag.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Task handler: payload text in, result text or error out. Errors travel
/// back to the client as an ERROR frame; they never touch the worker.
pub type Handler =
    Arc<dyn Fn(&str) -> Result<String, Box<dyn std::error::Error + Send + Sync>> + Send + Sync>;

/// TCP server executing task payloads on an instrumented worker pool.
pub struct TaskServer {
    port: u16,
    handler: Handler,
    pool: Arc<InstrumentedPool>,
    running: Arc<AtomicBool>,
    accept_thread: Option<thread::JoinHandle<()>>,

    conn_accepted: Arc<Counter>,
    conn_active: Arc<Gauge>,
    requests_total: Arc<Counter>,
    request_errors: Arc<Counter>,
    request_latency: Arc<Histogram>,
}

impl TaskServer {
    /// Create a server; `start()` binds and begins accepting.
    ///
    /// Pool metrics and the server's own metrics land in `registry`.
    pub fn new(
        port: u16,
        handler: Handler,
        registry: &Arc<MetricsRegistry>,
        threads: usize,
    ) -> Self {
        let pool = Arc::new(InstrumentedPool::with_registry(threads, Arc::clone(registry)));

        let conn_accepted = registry.register_counter(
            "server_connections_accepted_total",
            "Total TCP connections accepted",
        );
        let conn_active = registry.register_gauge(
            "server_connections_active_current",
            "Currently open TCP connections",
        );
        let requests_total =
            registry.register_counter("server_requests_total", "Total task requests received");
        let request_errors = registry.register_counter(
            "server_request_errors_total",
            "Total requests that resulted in errors",
        );
        let request_latency = registry.register_histogram(
            "server_request_latency_seconds",
            "End-to-end request latency from TCP receive to TCP send",
        );

        Self {
            port,
            handler,
            pool,
            running: Arc::new(AtomicBool::new(false)),
            accept_thread: None,
            conn_accepted,
            conn_active,
            requests_total,
            request_errors,
            request_latency,
        }
    }

    /// Bind the listener and start the accept loop.
    pub fn start(&mut self) -> io::Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", self.port))?;
        self.port = listener.local_addr()?.port();
        listener.set_nonblocking(true)?;
        self.running.store(true, Ordering::Release);

        let running = Arc::clone(&self.running);
        let pool = Arc::clone(&self.pool);
        let handler = Arc::clone(&self.handler);
        let conn_accepted = Arc::clone(&self.conn_accepted);
        let conn_active = Arc::clone(&self.conn_active);
        let requests_total = Arc::clone(&self.requests_total);
        let request_errors = Arc::clone(&self.request_errors);
        let request_latency = Arc::clone(&self.request_latency);

        let accept_thread = thread::Builder::new()
            .name("taskring-accept".to_string())
            .spawn(move || {
                while running.load(Ordering::Acquire) {
                    match listener.accept() {
                        Ok((stream, _peer)) => {
                            conn_accepted.inc();
                            conn_active.inc();

                            let task = ConnectionTask {
                                stream,
                                running: Arc::clone(&running),
                                handler: Arc::clone(&handler),
                                conn_active: Arc::clone(&conn_active),
                                requests_total: Arc::clone(&requests_total),
                                request_errors: Arc::clone(&request_errors),
                                request_latency: Arc::clone(&request_latency),
                            };
                            if pool.enqueue(move || task.run()).is_err() {
                                // Pool saturated or stopping; the dropped
                                // stream closes the connection.
                                conn_active.dec();
                            }
                        }
                        Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                            thread::sleep(POLL_INTERVAL);
                        }
                        Err(_) => {
                            if !running.load(Ordering::Acquire) {
                                break;
                            }
                        }
                    }
                }
            })
            .expect("failed to spawn accept thread");

        self.accept_thread = Some(accept_thread);
        Ok(())
    }

    /// Stop accepting and join the accept thread. Idempotent. In-flight
    /// connection tasks observe the flag at their next frame-poll tick.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.accept_thread.take() {
            let _ = thread.join();
        }
    }

    /// The bound port. After `start()` with port 0 this is the ephemeral
    /// port the OS assigned.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The pool executing connection tasks, for metric snapshots.
    pub fn pool(&self) -> &InstrumentedPool {
        &self.pool
    }
}

impl Drop for TaskServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Everything one connection needs; runs as a single pool task.
struct ConnectionTask {
    stream: TcpStream,
    running: Arc<AtomicBool>,
    handler: Handler,
    conn_active: Arc<Gauge>,
    requests_total: Arc<Counter>,
    request_errors: Arc<Counter>,
    request_latency: Arc<Histogram>,
}

impl ConnectionTask {
    fn run(mut self) {
        let _ = self.stream.set_nodelay(true);

        loop {
            if !self.running.load(Ordering::Acquire) {
                break;
            }

            let msg = match wait_for_frame(&mut self.stream, &self.running) {
                Ok(Some(msg)) => msg,
                // Clean disconnect, shutdown, or a framing error: either way
                // this connection is done.
                Ok(None) | Err(_) => break,
            };

            match msg.kind {
                MessageKind::Ping => {
                    let pong = Message::new(MessageKind::Pong, msg.id, Vec::new());
                    if write_message(&mut self.stream, &pong).is_err() {
                        break;
                    }
                }
                MessageKind::Request => {
                    if !self.handle_request(msg) {
                        break;
                    }
                }
                // Clients have no business sending server-side kinds.
                _ => break,
            }
        }

        self.conn_active.dec();
    }

    /// Run the handler for one request and reply. Returns false when the
    /// connection should close.
    fn handle_request(&mut self, msg: Message) -> bool {
        let start = Instant::now();
        self.requests_total.inc();

        let payload = msg.payload_str().into_owned();
        let handler = Arc::clone(&self.handler);
        let outcome = panic::catch_unwind(AssertUnwindSafe(move || handler(&payload)));

        let (kind, body) = match outcome {
            Ok(Ok(result)) => (MessageKind::Response, result),
            Ok(Err(err)) => {
                self.request_errors.inc();
                (MessageKind::Error, format!("ERROR: {err}"))
            }
            Err(payload) => {
                self.request_errors.inc();
                (MessageKind::Error, format!("ERROR: {}", panic_message(&payload)))
            }
        };

        let reply = Message::new(kind, msg.id, body.into_bytes());
        if write_message(&mut self.stream, &reply).is_err() {
            return false;
        }

        self.request_latency.observe_since(start);
        true
    }
}

/// Wait for the next frame, polling the running flag while the connection
/// is idle.
///
/// The poll uses `peek`, so no frame byte is consumed until a frame has
/// started to arrive; the frame itself is then read blocking. A timeout can
/// therefore never split a frame.
fn wait_for_frame(
    stream: &mut TcpStream,
    running: &AtomicBool,
) -> Result<Option<Message>, ProtocolError> {
    stream.set_read_timeout(Some(POLL_INTERVAL))?;

    let mut probe = [0u8; 1];
    loop {
        if !running.load(Ordering::Acquire) {
            return Ok(None);
        }
        match stream.peek(&mut probe) {
            Ok(0) => return Ok(None),
            Ok(_) => break,
            Err(err)
                if err.kind() == io::ErrorKind::WouldBlock
                    || err.kind() == io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(err) => return Err(ProtocolError::Io(err)),
        }
    }

    stream.set_read_timeout(None)?;
    read_message(stream)
}
