//! Small, self-contained concurrency structures used across the project.
//!
//! # Scope
//! `stdx` hosts the lock-free plumbing that backs the worker pool. The types
//! here are tuned for predictable memory use and hot-path behavior rather
//! than general-purpose ergonomics.
//!
//! # Design themes
//! - Fixed capacity decided at construction; overflow is surfaced to the
//!   caller, never absorbed.
//! - Tight invariants enable `unsafe` fast paths (documented per type).
//! - Cache-line padding on every cross-thread atomic.
//!
//! # Module map
//! - `mpmc`: bounded multi-producer/multi-consumer ring with per-slot
//!   sequence numbers.
//!
//! # Safety
//! The ring uses `unsafe` internally and relies on invariants called out in
//! its module docs. Read those before extending or reusing the internals.

pub mod mpmc;

pub use mpmc::MpmcRing;
