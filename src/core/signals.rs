//! # OS signal handling with escalation.
//!
//! Every termination signal is turned into a `HARD_SHUTDOWN` event so the runner
//! stops everything in order; a pending mode switch may discard one of them, never all.
//! Repeated signals mean the orderly path is not making progress: after `max_tries`
//! of them the runner's own token is cancelled.
//!
//! **Unix:** `SIGINT`, `SIGTERM`, `SIGQUIT`. **Elsewhere:** Ctrl-C.

use std::ops::ControlFlow;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::events::{Bus, EventKind, EventMessage};

/// Waits for one termination signal.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = sigint.recv()  => {},
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
    Ok(())
}

/// Waits for one termination signal.
#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

/// Signal counter shared by the listener task.
#[derive(Debug)]
struct Escalation {
    bus: Bus,
    force: CancellationToken,
    max_tries: u32,
    seen: u32,
}

impl Escalation {
    fn new(bus: Bus, force: CancellationToken, max_tries: u32) -> Self {
        Self {
            bus,
            force,
            max_tries: max_tries.max(1),
            seen: 0,
        }
    }

    /// Handles one signal. `Break` once the stop has been forced.
    fn on_signal(&mut self) -> ControlFlow<()> {
        self.seen += 1;
        warn!(seen = self.seen, max_tries = self.max_tries, "termination signal received; requesting hard shutdown");
        self.bus
            .publish(EventMessage::new(EventKind::HardShutdown).with_source("SIGNAL"));
        if self.seen >= self.max_tries {
            error!("signal limit reached; forcing stop");
            self.force.cancel();
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    }
}

/// Spawns a listener that escalates repeated signals.
///
/// - every signal: `HARD_SHUTDOWN` published on `bus`
/// - `max_tries`-th signal: `force` cancelled
///
/// The listener ends when `force` is cancelled by anyone.
pub fn spawn_signal_escalation(
    bus: Bus,
    force: CancellationToken,
    max_tries: u32,
) -> JoinHandle<()> {
    let mut escalation = Escalation::new(bus, force.clone(), max_tries);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = force.cancelled() => return,
                res = wait_for_shutdown_signal() => {
                    if let Err(err) = res {
                        error!(error = %err, "signal registration failed");
                        return;
                    }
                }
            }
            if escalation.on_signal().is_break() {
                return;
            }
        }
    })
}
