//! # Supervisor: owns exactly one running worker.
//!
//! [`Supervisor::spawn`] starts a worker in its own tokio task and blocks until the
//! worker acknowledges startup (bounded by `startup_wait`). After that the supervisor
//! offers graceful stop with forced-termination fallback, liveness and exit-status
//! inspection.
//!
//! ## Architecture
//! ```text
//! Supervisor::spawn(name, worker, parent_token, bus, cfg)
//!   ├─ token = parent_token.child_token()
//!   ├─ tokio::spawn(run_worker(worker, ctx, started_tx))
//!   └─ timeout(startup_wait, started_rx):
//!        ├─ Ok(ack)      → Ok(Supervisor)
//!        ├─ sender gone  → reap, Err(StartupAborted)
//!        └─ elapsed      → terminate(), Err(StartupFailed)
//!
//! full_stop(timeout)
//!   ├─ token.cancel()
//!   ├─ join up to timeout → exit status
//!   └─ still running      → terminate(): abort + short sleep, up to max_tries
//! ```
//!
//! ## Rules
//! - A non-zero exit status is logged and reported, never raised; restart policy lives in the runner.
//! - Dropping a supervisor aborts its task if it is still running.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::core::SupervisionConfig;
use crate::error::RuntimeError;
use crate::events::Bus;
use crate::worker::{run_worker, ExitStatus, Worker, WorkerCtx};

const TERMINATE_PAUSE: Duration = Duration::from_millis(10);

/// Handle to one supervised worker task.
pub struct Supervisor {
    name: Arc<str>,
    token: CancellationToken,
    handle: Option<JoinHandle<ExitStatus>>,
    status: Option<ExitStatus>,
    cfg: SupervisionConfig,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("name", &self.name)
            .field("alive", &self.is_alive())
            .field("status", &self.status)
            .finish()
    }
}

impl Supervisor {
    /// Spawns `worker` and waits for its startup acknowledgement.
    pub async fn spawn<W: Worker>(
        name: impl Into<Arc<str>>,
        worker: W,
        parent: &CancellationToken,
        bus: Bus,
        cfg: SupervisionConfig,
    ) -> Result<Self, RuntimeError> {
        let name = name.into();
        let token = parent.child_token();
        let ctx = WorkerCtx::new(Arc::clone(&name), token.clone(), bus, cfg);
        let (started_tx, started_rx) = oneshot::channel();
        let handle = tokio::spawn(run_worker(worker, ctx, started_tx));

        let mut sup = Self {
            name,
            token,
            handle: Some(handle),
            status: None,
            cfg,
        };

        match tokio::time::timeout(cfg.startup_wait, started_rx).await {
            Ok(Ok(())) => {
                debug!(worker = %sup.name, "startup acknowledged");
                Ok(sup)
            }
            Ok(Err(_)) => {
                let reason = match sup.join(cfg.shutdown_wait).await {
                    Some(status) => format!("exit status {}", status.code()),
                    None => {
                        sup.terminate().await;
                        "startup hook did not return".to_string()
                    }
                };
                error!(worker = %sup.name, %reason, "worker aborted during startup");
                Err(RuntimeError::StartupAborted {
                    name: sup.name.to_string(),
                    reason,
                })
            }
            Err(_) => {
                error!(worker = %sup.name, waited = ?cfg.startup_wait, "startup not acknowledged");
                sup.token.cancel();
                sup.terminate().await;
                Err(RuntimeError::StartupFailed {
                    name: sup.name.to_string(),
                    waited: cfg.startup_wait,
                })
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True while the worker task has not finished.
    pub fn is_alive(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Exit status, once the task has been reaped.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.status
    }

    /// Requests a cooperative stop without waiting.
    pub fn request_stop(&self) {
        self.token.cancel();
    }

    /// Waits up to `timeout` for the task to finish and records its exit status.
    pub async fn join(&mut self, timeout: Duration) -> Option<ExitStatus> {
        if let Some(status) = self.status {
            return Some(status);
        }
        let handle = self.handle.as_mut()?;
        let res = tokio::time::timeout(timeout, handle).await.ok()?;
        self.handle = None;
        let status = Self::status_of(res);
        self.status = Some(status);
        if !status.is_success() {
            error!(worker = %self.name, code = status.code(), "worker exited with error");
        }
        Some(status)
    }

    /// Cancels the worker, waits up to `timeout`, then terminates it if needed.
    ///
    /// Returns the exit status, or `None` if the task could not be brought down.
    pub async fn full_stop(&mut self, timeout: Duration) -> Option<ExitStatus> {
        self.token.cancel();
        if let Some(status) = self.join(timeout).await {
            return Some(status);
        }
        warn!(worker = %self.name, ?timeout, "no cooperative stop; terminating");
        self.terminate().await;
        self.status
    }

    /// Aborts the task up to `max_tries` times with short pauses.
    ///
    /// Returns whether the task is confirmed finished.
    pub async fn terminate(&mut self) -> bool {
        for attempt in 1..=self.cfg.tries() {
            let Some(handle) = self.handle.as_ref() else {
                return true;
            };
            if handle.is_finished() {
                break;
            }
            warn!(worker = %self.name, attempt, "terminating worker");
            handle.abort();
            tokio::time::sleep(TERMINATE_PAUSE).await;
        }
        if self.handle.as_ref().is_some_and(|h| h.is_finished()) {
            self.join(Duration::ZERO).await;
            return true;
        }
        if self.handle.is_none() {
            return true;
        }
        error!(worker = %self.name, tries = self.cfg.tries(), "worker survived termination");
        false
    }

    fn status_of(res: Result<ExitStatus, JoinError>) -> ExitStatus {
        match res {
            Ok(status) => status,
            Err(err) if err.is_cancelled() => ExitStatus::Killed,
            Err(_) => ExitStatus::Failed,
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if !handle.is_finished() {
                warn!(worker = %self.name, "supervisor dropped with live worker; aborting");
                handle.abort();
            }
        }
    }
}
