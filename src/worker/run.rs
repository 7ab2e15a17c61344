use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio::sync::oneshot;
use tracing::{error, info, info_span, Instrument};

use super::{Worker, WorkerCtx};
#[cfg(test)]
use crate::error::WorkerError;
use crate::events::EventKind;

/// How a worker task ended; the analogue of a process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// `main_loop` returned and `shutdown` succeeded.
    Normal,
    /// A hook returned `WorkerError::Interrupted`.
    Interrupted,
    /// A hook failed or panicked.
    Failed,
    /// The task was aborted by `Supervisor::terminate`.
    Killed,
}

impl ExitStatus {
    pub fn code(&self) -> i32 {
        match self {
            ExitStatus::Normal => 0,
            ExitStatus::Interrupted => 1,
            ExitStatus::Failed => 2,
            ExitStatus::Killed => -9,
        }
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, ExitStatus::Normal)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Drives a worker through its lifecycle.
///
/// `started` fires after `startup` succeeds. Errors and panics from `startup` or
/// `main_loop` are logged and published as `FATAL`; `shutdown` then runs exactly once
/// and its own error is logged, never hidden.
pub async fn run_worker<W: Worker>(
    mut worker: W,
    ctx: WorkerCtx,
    started: oneshot::Sender<()>,
) -> ExitStatus {
    let span = info_span!("worker", name = %ctx.name);
    async move {
        let outcome = AssertUnwindSafe(async {
            worker.startup(&ctx).await?;
            // Receiver may already have given up on us; nothing to do then.
            let _ = started.send(());
            info!("started");
            worker.main_loop(&ctx).await
        })
        .catch_unwind()
        .await;

        let mut status = match outcome {
            Ok(Ok(())) => {
                info!("normal shutdown");
                ExitStatus::Normal
            }
            Ok(Err(err)) => {
                error!(label = err.as_label(), error = %err.as_message(), "exception shutdown");
                ctx.emit_text(EventKind::Fatal, err.to_string());
                if err.is_interrupt() {
                    ExitStatus::Interrupted
                } else {
                    ExitStatus::Failed
                }
            }
            Err(panic) => {
                let msg = panic_message(&*panic);
                error!(panic = %msg, "worker panicked");
                ctx.emit_text(EventKind::Fatal, format!("panic: {msg}"));
                ExitStatus::Failed
            }
        };

        if let Err(err) = worker.shutdown(&ctx).await {
            error!(label = err.as_label(), error = %err.as_message(), "shutdown hook failed");
            if status == ExitStatus::Normal {
                status = ExitStatus::Failed;
            }
        }
        status
    }
    .instrument(span)
    .await
}
