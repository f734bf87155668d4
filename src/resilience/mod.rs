//! Resilience helpers.
//!
//! The notification listener retries a failing subscription with
//! exponential backoff; outbound calls are bounded by per-call timeouts at
//! their call sites (dispatch, proxy).

pub mod backoff;

pub use backoff::{calculate_backoff, Backoff};
