//! Retry and backoff policy for failed extractor runs.
//!
//! The engine asks [`RetryPolicy::decide`] after every failing exit; every
//! failure kind is retried the same way.

mod policy;

pub use policy::{RetryDecision, RetryPolicy};
