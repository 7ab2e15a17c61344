//! # Worker abstraction: one supervised unit of execution.
//!
//! A [`Worker`] goes through `startup → main_loop → shutdown`. [`run_worker`] drives
//! that lifecycle inside its own tokio task, acknowledges startup to the
//! [`Supervisor`](crate::core::Supervisor), and turns errors and panics into a `FATAL`
//! event plus a non-zero [`ExitStatus`].
//!
//! Two scheduling variants are provided as loop helpers a worker calls from `main_loop`:
//! - [`TimerWorker`] + [`timer_loop`]: call `main_func` on absolute deadlines.
//! - [`QueueWorker`] + [`queue_loop`]: call `main_func` for each item of an injected queue
//!   until `Work::End`, a closed queue, or shutdown.
//!
//! ```text
//! run_worker(worker, ctx, started)
//!   ├─ startup()            ── error/panic ──► FATAL event, status 2
//!   ├─ started.send(())     ── Supervisor::spawn returns
//!   ├─ main_loop()          ── error/panic ──► FATAL event, status 2 (1 if interrupted)
//!   └─ shutdown()           ── always, exactly once; error turns status 0 into 2
//! ```

mod context;
mod loops;
mod run;

pub use context::WorkerCtx;
pub use loops::{queue_loop, timer_loop, QueueWorker, TimerWorker};
pub use run::{run_worker, ExitStatus};

use async_trait::async_trait;

use crate::error::WorkerError;

/// Lifecycle hooks of a supervised worker.
///
/// Workers own none of their queues: input and output queues are injected at construction.
#[async_trait]
pub trait Worker: Send + 'static {
    /// Runs before the startup acknowledgement. Failing here fails `Supervisor::spawn`.
    async fn startup(&mut self, _ctx: &WorkerCtx) -> Result<(), WorkerError> {
        Ok(())
    }

    /// Main body. Returning `Ok` is a normal exit.
    async fn main_loop(&mut self, ctx: &WorkerCtx) -> Result<(), WorkerError>;

    /// Cleanup, run exactly once after `main_loop` (or after a failed `startup`).
    async fn shutdown(&mut self, _ctx: &WorkerCtx) -> Result<(), WorkerError> {
        Ok(())
    }
}
