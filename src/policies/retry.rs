//! # Bounded retries for transient collaborator failures.
//!
//! ```text
//! attempt 1 ── Err ── sleep(backoff.delay(0)) ── attempt 2 ── Err ── ... ── attempt N ── Err ──► Exhausted
//!     └── Ok ──► Ok(value)                     (token cancelled at any point ──► Cancelled)
//! ```

use std::future::Future;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::policies::BackoffPolicy;

/// Why a retried operation gave up.
#[derive(Error, Debug)]
pub enum RetryError<E> {
    #[error("gave up after {tries} tries: {last}")]
    Exhausted { tries: u32, last: E },
    #[error("cancelled")]
    Cancelled,
}

impl<E> RetryError<E> {
    pub fn as_label(&self) -> &'static str {
        match self {
            RetryError::Exhausted { .. } => "retry_exhausted",
            RetryError::Cancelled => "retry_cancelled",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryPolicy {
    pub max_tries: u32,
    pub backoff: BackoffPolicy,
}

impl RetryPolicy {
    pub fn new(max_tries: u32, backoff: BackoffPolicy) -> Self {
        Self { max_tries, backoff }
    }

    /// Runs `op` (given the 1-based attempt number) until it succeeds, `max_tries`
    /// attempts have failed, or `token` is cancelled.
    pub async fn run<T, E, F, Fut>(
        &self,
        what: &str,
        token: &CancellationToken,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        E: std::fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let tries = self.max_tries.max(1);
        let mut attempt = 1;
        loop {
            if token.is_cancelled() {
                return Err(RetryError::Cancelled);
            }
            let err = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            warn!(what, attempt, tries, error = %err, "attempt failed");
            if attempt >= tries {
                return Err(RetryError::Exhausted { tries, last: err });
            }
            let delay = self.backoff.delay(attempt - 1);
            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(RetryError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}
