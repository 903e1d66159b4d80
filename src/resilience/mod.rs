//! Resilience patterns for fault-tolerant chunk dispatch
//!
//! This module provides:
//! - [`retry`]: bounded exponential backoff with jitter

pub mod retry;

pub use retry::{RetryConfig, RetryPolicy};
