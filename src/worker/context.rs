use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::core::SupervisionConfig;
use crate::events::{Bus, EventKind, EventMessage};

/// Per-worker handle to the shared runtime: name, shutdown token and event sink.
#[derive(Clone, Debug)]
pub struct WorkerCtx {
    pub name: Arc<str>,
    pub shutdown: CancellationToken,
    pub bus: Bus,
    pub cfg: SupervisionConfig,
}

impl WorkerCtx {
    pub fn new(
        name: impl Into<Arc<str>>,
        shutdown: CancellationToken,
        bus: Bus,
        cfg: SupervisionConfig,
    ) -> Self {
        Self {
            name: name.into(),
            shutdown,
            bus,
            cfg,
        }
    }

    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Publishes a message stamped with this worker's name.
    pub fn emit(&self, ev: EventMessage) -> bool {
        self.bus.publish(ev.with_source(Arc::clone(&self.name)))
    }

    pub fn emit_kind(&self, kind: EventKind) -> bool {
        self.emit(EventMessage::new(kind))
    }

    pub fn emit_text(&self, kind: EventKind, text: impl Into<Arc<str>>) -> bool {
        self.emit(EventMessage::new(kind).with_text(text))
    }

    /// Sleeps for `d` unless shutdown fires first. Returns `false` when interrupted.
    pub async fn sleep(&self, d: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => false,
            _ = tokio::time::sleep(d) => true,
        }
    }
}
