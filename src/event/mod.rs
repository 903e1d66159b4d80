//! Event Module - audit trail of jobs, chunks and incremental updates
//!
//! Key types:
//! - `Event`: Envelope with id + timestamp + kind
//! - `EventKind`: job / chunk / incremental / placement variants
//! - `EventLog`: Thread-safe, append-only log
//! - `EventEmitter`: Trait for dependency injection
//! - `NoopEmitter`: Zero-cost no-op

mod emitter;
mod log;

pub use emitter::{EventEmitter, NoopEmitter};
pub use log::{Event, EventKind, EventLog};
