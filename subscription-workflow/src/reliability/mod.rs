//! Host-side reliability policy for activity dispatch.
//!
//! Retries happen underneath a single logical activity call, so the lifecycle
//! state machine observes exactly one success or failure per transition.

mod retry;

pub use retry::{RetryPolicy, is_retryable, retry_with_backoff};
