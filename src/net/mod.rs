//! Network frontend: wire protocol, task server/client, metrics endpoint.
//!
//! The executor itself is process-local; this module puts it on the wire.
//! `protocol` frames messages, `server` feeds framed requests into the
//! instrumented pool, `client` submits from another process, and `http`
//! exposes the metrics registry to Prometheus scrapes.

pub mod client;
pub mod http;
pub mod protocol;
pub mod server;

pub use client::{ClientError, TaskClient};
pub use http::{MetricsServer, DEFAULT_METRICS_PORT};
pub use protocol::{Message, MessageKind, ProtocolError};
pub use server::{Handler, TaskServer};
