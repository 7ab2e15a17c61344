//! Retry and backoff policies.
//!
//! ## Contents
//! - [`BackoffPolicy`] how delays evolve (first / factor / max + jitter)
//! - [`JitterPolicy`]  randomization so pooled workers do not retry in lockstep
//! - [`RetryPolicy`]   bounded, cancellable retries of a fallible async operation
//!
//! ## Quick wiring
//! ```text
//! Uploader / Notifier ──► RetryPolicy { max_tries, backoff }.run(op)
//! Collector           ──► BackoffPolicy::capped_multiple(interval, 2.0, 8).delay(congested_ticks)
//! ```

mod backoff;
mod jitter;
mod retry;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
pub use retry::{RetryError, RetryPolicy};
