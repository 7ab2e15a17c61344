//! # Context: scoped registry of supervisors and queues.
//!
//! A [`Context`] owns a shared shutdown token, an event [`Bus`], the queues it created
//! and the supervisors it spawned. The runner keeps one primary context for its whole
//! life and creates a *secondary* context per operating mode; a secondary shares the
//! primary's bus, so every event bubbles up to one consumer.
//!
//! ## Architecture
//! ```text
//! Context (primary)  token T0, bus B, queues [B, NOTIFY], procs [NOTIFIER]
//!   └── secondary    token T0.child(), bus B, queues [IMG], procs [COLLECT, DETECT]
//!
//! stop_all()
//!   ├─ stop_procs():   cancel token; join all against one deadline (shutdown_wait);
//!   │                  rejoin stragglers briefly; terminate() what is left
//!   └─ stop_all_queues(): drain + close every owned queue
//! ```
//!
//! ## Rules
//! - Registries are mutated only by the owner (`&mut self`), never concurrently.
//! - A secondary never closes the shared bus.
//! - Dropping a context cancels its token; supervisors abort live tasks on drop.

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::{SupervisionConfig, Supervisor};
use crate::error::RuntimeError;
use crate::events::Bus;
use crate::queue::{MsgQueue, QueueHandle};
use crate::worker::Worker;

const REJOIN_WAIT: Duration = Duration::from_millis(200);

/// Outcome of a stop sequence.
///
/// - `failed`: workers that ended with a non-zero exit status (terminated ones included)
/// - `terminated`: workers that had to be aborted
/// - `stuck`: workers still alive after termination
/// - `drained`: items discarded from owned queues
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StopReport {
    pub failed: usize,
    pub terminated: usize,
    pub stuck: usize,
    pub drained: usize,
}

impl StopReport {
    /// True when no worker is left running.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.stuck == 0
    }
}

/// Scoped registry of supervisors and queues with bulk stop semantics.
pub struct Context {
    name: Arc<str>,
    cfg: SupervisionConfig,
    token: CancellationToken,
    bus: Bus,
    procs: Vec<Supervisor>,
    queues: Vec<Arc<dyn QueueHandle>>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("name", &self.name)
            .field("procs", &self.procs)
            .field("queues", &self.queues.len())
            .finish()
    }
}

impl Context {
    /// Creates a primary context with its own bus and token.
    pub fn new(name: impl Into<Arc<str>>, cfg: SupervisionConfig) -> Self {
        let bus = Bus::new(cfg.bus_capacity_clamped());
        let queues: Vec<Arc<dyn QueueHandle>> = vec![Arc::new(bus.queue().clone())];
        Self {
            name: name.into(),
            cfg,
            token: CancellationToken::new(),
            bus,
            procs: Vec::new(),
            queues,
        }
    }

    /// Creates a nested context sharing this context's bus.
    ///
    /// Its token is a child of this one: stopping the parent stops the secondary too.
    pub fn secondary(&self, name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            cfg: self.cfg,
            token: self.token.child_token(),
            bus: self.bus.clone(),
            procs: Vec::new(),
            queues: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cfg(&self) -> &SupervisionConfig {
        &self.cfg
    }

    /// Creates a queue owned by this context.
    pub fn queue<T: Send + 'static>(&mut self, capacity: usize) -> MsgQueue<T> {
        let queue = MsgQueue::new(capacity);
        self.queues.push(Arc::new(queue.clone()));
        queue
    }

    /// Spawns a supervised worker and registers it.
    pub async fn spawn<W: Worker>(
        &mut self,
        name: impl Into<Arc<str>>,
        worker: W,
    ) -> Result<(), RuntimeError> {
        let sup =
            Supervisor::spawn(name, worker, &self.token, self.bus.clone(), self.cfg).await?;
        debug!(context = %self.name, worker = sup.name(), "worker registered");
        self.procs.push(sup);
        Ok(())
    }

    /// Names of workers still running.
    pub fn live(&self) -> Vec<&str> {
        self.procs
            .iter()
            .filter(|p| p.is_alive())
            .map(|p| p.name())
            .collect()
    }

    pub fn live_count(&self) -> usize {
        self.procs.iter().filter(|p| p.is_alive()).count()
    }

    /// Cancels every worker and waits for them against one shared deadline.
    pub async fn stop_procs(&mut self) -> StopReport {
        self.token.cancel();
        let mut procs = std::mem::take(&mut self.procs);
        let report = self.stop_set(&mut procs).await;
        self.keep_alive(procs);
        report
    }

    /// Stops only workers whose name matches `pattern`.
    pub async fn stop_procs_by_name(&mut self, pattern: &Regex) -> StopReport {
        let (mut matched, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.procs)
            .into_iter()
            .partition(|p| pattern.is_match(p.name()));
        self.procs = rest;
        for p in &matched {
            p.request_stop();
        }
        let report = self.stop_set(&mut matched).await;
        self.keep_alive(matched);
        report
    }

    /// Drains and closes every owned queue. Returns the number of discarded items.
    pub fn stop_all_queues(&mut self) -> usize {
        let mut drained = 0;
        for q in &self.queues {
            drained += q.drain_count();
            q.close();
        }
        drained
    }

    /// Stops every worker, then every owned queue.
    pub async fn stop_all(&mut self) -> StopReport {
        let mut report = self.stop_procs().await;
        report.drained = self.stop_all_queues();
        if report.is_complete() {
            info!(context = %self.name, failed = report.failed, drained = report.drained, "context stopped");
        } else {
            error!(context = %self.name, stuck = report.stuck, "context stopped with stuck workers");
        }
        report
    }

    /// Waits up to `timeout` for every worker to finish on its own.
    ///
    /// Returns `true` when none is left running.
    pub async fn join_all(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        for p in &mut self.procs {
            let left = deadline.saturating_duration_since(Instant::now());
            p.join(left).await;
        }
        self.live_count() == 0
    }

    /// True when every owned queue is closed and no worker is running.
    pub fn is_stopped(&self) -> bool {
        self.live_count() == 0 && self.queues.iter().all(|q| q.is_closed())
    }

    async fn stop_set(&self, procs: &mut [Supervisor]) -> StopReport {
        let deadline = Instant::now() + self.cfg.shutdown_wait;
        let mut report = StopReport::default();

        for p in procs.iter_mut() {
            let left = deadline.saturating_duration_since(Instant::now());
            p.join(left).await;
        }
        for p in procs.iter_mut() {
            if p.exit_status().is_none() && p.join(REJOIN_WAIT).await.is_none() {
                warn!(context = %self.name, worker = p.name(), "worker missed grace window");
                if p.terminate().await {
                    report.terminated += 1;
                } else {
                    report.stuck += 1;
                }
            }
            if p.exit_status().is_some_and(|s| !s.is_success()) {
                report.failed += 1;
            }
        }
        if report.failed > 0 {
            error!(context = %self.name, failed = report.failed, "workers exited with failure");
        }
        report
    }

    fn keep_alive(&mut self, procs: Vec<Supervisor>) {
        self.procs.extend(procs.into_iter().filter(|p| p.is_alive()));
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Stops a context, retrying up to `max_tries` times until no worker is left.
pub async fn stop_with_retries(ctx: &mut Context) -> Result<StopReport, RuntimeError> {
    let tries = ctx.cfg.tries();
    let mut total = StopReport::default();
    for attempt in 1..=tries {
        let report = ctx.stop_all().await;
        total.failed += report.failed;
        total.terminated += report.terminated;
        total.drained += report.drained;
        total.stuck = report.stuck;
        if report.is_complete() {
            return Ok(total);
        }
        warn!(context = %ctx.name, attempt, stuck = report.stuck, "stop attempt incomplete");
    }
    Err(RuntimeError::ShutdownExhausted {
        context: ctx.name.to_string(),
        tries,
    })
}
