//! Error types used by the fishvisor runtime and its workers.
//!
//! - [`RuntimeError`]: supervision-fatal errors raised by the orchestration layer itself.
//! - [`WorkerError`]: errors returned from a worker's lifecycle hooks.
//!
//! Both provide `as_label` (stable snake_case for logs) and `as_message`.

use std::time::Duration;
use thiserror::Error;

/// # Errors produced by the supervision layer.
///
/// A worker that cannot start is a configuration error, not a transient fault,
/// so these are surfaced synchronously to the caller.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The worker did not acknowledge startup within the configured wait.
    #[error("worker {name} did not start within {waited:?}")]
    StartupFailed { name: String, waited: Duration },

    /// The worker task ended before acknowledging startup.
    #[error("worker {name} exited before startup: {reason}")]
    StartupAborted { name: String, reason: String },

    /// A context could not be brought down after every retry.
    #[error("context {context} still running after {tries} stop attempts")]
    ShutdownExhausted { context: String, tries: u32 },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use fishvisor::RuntimeError;
    /// use std::time::Duration;
    ///
    /// let err = RuntimeError::StartupFailed { name: "COLLECT".into(), waited: Duration::from_secs(10) };
    /// assert_eq!(err.as_label(), "runtime_startup_failed");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::StartupFailed { .. } => "runtime_startup_failed",
            RuntimeError::StartupAborted { .. } => "runtime_startup_aborted",
            RuntimeError::ShutdownExhausted { .. } => "runtime_shutdown_exhausted",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            RuntimeError::StartupFailed { name, waited } => {
                format!("startup of {name} not acknowledged after {waited:?}")
            }
            RuntimeError::StartupAborted { name, reason } => {
                format!("{name} aborted during startup: {reason}")
            }
            RuntimeError::ShutdownExhausted { context, tries } => {
                format!("{context} not stopped after {tries} tries")
            }
        }
    }
}

/// # Errors returned from worker hooks.
///
/// Any of these ending `startup` or `main_loop` makes the worker publish a
/// `FATAL` event; `Interrupted` only marks a cooperative stop and exits with
/// the interrupted status instead.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Worker step failed.
    #[error("execution failed: {error}")]
    Fail { error: String },

    /// Unrecoverable condition; the runner should reboot the device.
    #[error("fatal error: {error}")]
    Fatal { error: String },

    /// The shutdown token fired mid-operation.
    #[error("interrupted")]
    Interrupted,
}

impl WorkerError {
    pub fn fail(error: impl Into<String>) -> Self {
        WorkerError::Fail {
            error: error.into(),
        }
    }

    pub fn fatal(error: impl Into<String>) -> Self {
        WorkerError::Fatal {
            error: error.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use fishvisor::WorkerError;
    ///
    /// assert_eq!(WorkerError::fail("boom").as_label(), "worker_failed");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            WorkerError::Fail { .. } => "worker_failed",
            WorkerError::Fatal { .. } => "worker_fatal",
            WorkerError::Interrupted => "worker_interrupted",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            WorkerError::Fail { error } => format!("error: {error}"),
            WorkerError::Fatal { error } => format!("fatal: {error}"),
            WorkerError::Interrupted => "interrupted".to_string(),
        }
    }

    /// True for the cooperative-stop case.
    pub fn is_interrupt(&self) -> bool {
        matches!(self, WorkerError::Interrupted)
    }
}
