//! # Runner: the orchestrating state machine.
//!
//! The runner owns the primary [`Context`] (event bus, notify queue, NOTIFY worker) and
//! one secondary context per operating mode. It is itself a [`Worker`]: one tick per
//! iteration of its main loop.
//!
//! ```text
//! tick
//!  ├─ 1. self-inject: project end passed ─► ENTER_END_MODE
//!  │                  kill_after elapsed  ─► HARD_SHUTDOWN
//!  │                  sentinel files      ─► their events
//!  ├─ 2. bus.next(poll_timeout)
//!  └─ 3. dispatch
//!        NOTIFY             ─► notify queue
//!        FATAL              ─► final notification, reboot request, hard shutdown
//!        HARD_SHUTDOWN      ─► soft shutdown, flush notifications, stop primary (terminal)
//!        SOFT_SHUTDOWN      ─► stop secondary only
//!        ENTER_ACTIVE/PASSIVE ─► switch_mode
//!        ENTER_END          ─► finish uploads, upload every project, then HARD_SHUTDOWN
//!        (none)             ─► verify_mode: wrong mode ─► ENTER_*; else idle
//! ```
//!
//! ## Mode worker sets
//! - **Active**: `COLLECT` ─img queue─► `DETECT`
//! - **Passive**: `UPLOAD_0..n`, `n = min(max_upload_workers, pending files)`
//! - **End**: like Passive over every project under `data_dir`; completes when no
//!   uploader is left
//!
//! ## Rules
//! - Mode switches drop every pending event except `NOTIFY`.
//! - A soft shutdown that fails after `max_tries` stop attempts raises `FATAL`.
//! - A mode forced through a sentinel file holds until the schedule's next transition.
//! - Mode requests received in End mode are ignored.
//! - Project end and `kill_after` are re-checked every tick until acted on.

mod mode;
mod schedule;
mod sentinel;
mod status;

pub use mode::Mode;
pub use schedule::{until, Clock, DailySchedule, Schedule, SystemClock};
pub use sentinel::{SentinelDir, SENTINEL_SOURCE};
pub use status::{HostReadings, StatusReport};

use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use crate::collab::Collaborators;
use crate::config::Config;
use crate::core::{spawn_signal_escalation, stop_with_retries, Context, SupervisionConfig};
use crate::error::{RuntimeError, WorkerError};
use crate::events::{Bus, EventKind, EventMessage, Notification};
use crate::observability::device_span;
use crate::queue::{MsgQueue, Work};
use crate::worker::{run_worker, ExitStatus, Worker, WorkerCtx};
use crate::workers::{pending_files, project_dirs, Collector, Detector, Notifier, Uploader};

const NOTIFY_QUEUE_CAPACITY: usize = 64;
const IMG_QUEUE_CAPACITY: usize = 32;

/// Subject of the notification sent on a fatal event.
pub const FATAL_KIND: &str = "fatal error";

pub struct Runner {
    cfg: Arc<Config>,
    collab: Collaborators,
    clock: Arc<dyn Clock>,
    schedule: Arc<dyn Schedule>,
    main: Context,
    secondary: Option<Context>,
    notify_q: MsgQueue<Work<Notification>>,
    sentinels: SentinelDir,
    mode: Mode,
    /// Set when the mode was forced; `Some(None)` holds indefinitely.
    pinned_until: Option<Option<NaiveDateTime>>,
    started: Instant,
    force: CancellationToken,
    last_event: Option<EventKind>,
    stopped: bool,
}

impl Runner {
    pub fn new(cfg: Arc<Config>, collab: Collaborators) -> Self {
        let sup = cfg.supervision();
        Self::with_supervision(cfg, collab, sup)
    }

    pub fn with_supervision(cfg: Arc<Config>, collab: Collaborators, sup: SupervisionConfig) -> Self {
        let mut main = Context::new("main", sup);
        let notify_q = main.queue(NOTIFY_QUEUE_CAPACITY);
        Self {
            clock: Arc::new(SystemClock),
            schedule: Arc::new(DailySchedule::from_config(&cfg)),
            sentinels: SentinelDir::new(cfg.sentinel_dir.clone()),
            cfg,
            collab,
            main,
            secondary: None,
            notify_q,
            mode: Mode::Passive,
            pinned_until: None,
            started: Instant::now(),
            force: CancellationToken::new(),
            last_event: None,
            stopped: false,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_schedule(mut self, schedule: Arc<dyn Schedule>) -> Self {
        self.schedule = schedule;
        self
    }

    /// Token whose cancellation abandons the orderly path.
    pub fn with_force_token(mut self, force: CancellationToken) -> Self {
        self.force = force;
        self
    }

    pub fn bus(&self) -> &Bus {
        self.main.bus()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn status(&self) -> StatusReport {
        let mut live: Vec<String> = self.main.live().into_iter().map(String::from).collect();
        if let Some(sec) = &self.secondary {
            live.extend(sec.live().into_iter().map(String::from));
        }
        let host = HostReadings::sample(&self.cfg.proj_dir, &self.cfg.data_dir);
        StatusReport {
            proj_id: self.cfg.proj_id.clone(),
            mode: self.mode,
            at: self.clock.now(),
            live_workers: live,
            last_event: self.last_event.map(|k| k.as_str().to_string()),
            idle_secs: host.idle_secs,
            disk_usage: host.disk_usage,
            mem_usage: host.mem_usage,
        }
    }

    /// Creates the project tree, starts the notifier and enters the initial mode.
    pub async fn start(&mut self) -> Result<(), RuntimeError> {
        self.cfg
            .create_project_tree()
            .map_err(|e| RuntimeError::StartupAborted {
                name: "RUNNER".to_string(),
                reason: format!("project tree: {e}"),
            })?;
        let notifier = Notifier::new(
            Arc::clone(&self.cfg),
            self.notify_q.clone(),
            Arc::clone(&self.collab.mailer),
        );
        self.main.spawn("NOTIFY", notifier).await?;

        let now = self.clock.now();
        let initial = if self.project_over(now) {
            Mode::End
        } else {
            self.schedule.expected_mode(now)
        };
        info!(proj_id = %self.cfg.proj_id, mode = %initial, "runner starting");
        self.enter(initial).await;
        Ok(())
    }

    /// Ticks until a terminal event or the force token.
    pub async fn run(&mut self) {
        while !self.stopped {
            if self.force.is_cancelled() {
                self.forced_stop().await;
                return;
            }
            if self.tick().await.is_break() {
                return;
            }
        }
    }

    /// One iteration of the state machine. `Break` once the runner has stopped.
    pub async fn tick(&mut self) -> ControlFlow<()> {
        if self.stopped {
            return ControlFlow::Break(());
        }
        self.inject_deadlines();
        for kind in self.sentinels.poll() {
            self.bus()
                .publish(EventMessage::new(kind).with_source(SENTINEL_SOURCE));
        }

        let poll = self.main.cfg().poll_timeout;
        let next = tokio::select! {
            biased;
            _ = self.force.cancelled() => return ControlFlow::Continue(()),
            ev = self.main.bus().next(poll) => ev,
        };
        match next {
            Some(ev) => self.dispatch(ev).await,
            None => {
                self.verify_mode().await;
                ControlFlow::Continue(())
            }
        }
    }

    fn project_over(&self, now: NaiveDateTime) -> bool {
        self.cfg.end.is_some_and(|end| now >= end)
    }

    /// Re-raised every tick until acted on: a mode switch may discard the pending event.
    fn inject_deadlines(&self) {
        if self.mode != Mode::End && self.project_over(self.clock.now()) {
            debug!("project end reached");
            self.bus().publish(
                EventMessage::new(EventKind::EnterEndMode).with_text("project end time reached"),
            );
        }
        if let Some(limit) = self.cfg.kill_after {
            if self.started.elapsed() >= limit {
                debug!(?limit, "kill_after reached");
                self.bus().publish(
                    EventMessage::new(EventKind::HardShutdown).with_text("kill_after condition reached"),
                );
            }
        }
    }

    async fn dispatch(&mut self, ev: EventMessage) -> ControlFlow<()> {
        self.last_event = Some(ev.kind);
        debug!(kind = %ev.kind, source = %ev.source, seq = ev.seq, "event");
        match ev.kind {
            EventKind::Notify => {
                let note = match (ev.notification(), ev.text()) {
                    (Some(n), _) => n.clone(),
                    (None, Some(text)) => Notification::new(format!("notice from {}", ev.source), text),
                    (None, None) => {
                        warn!(source = %ev.source, "NOTIFY without payload ignored");
                        return ControlFlow::Continue(());
                    }
                };
                self.forward(note).await;
            }
            EventKind::Fatal => {
                let msg = ev.text().unwrap_or("unspecified");
                error!(source = %ev.source, error = msg, "fatal event");
                self.fatal(&ev.source, msg).await;
                return ControlFlow::Break(());
            }
            EventKind::HardShutdown => {
                info!(source = %ev.source, reason = ev.text().unwrap_or(""), "hard shutdown requested");
                self.hard_shutdown().await;
                return ControlFlow::Break(());
            }
            EventKind::SoftShutdown => {
                info!(source = %ev.source, "soft shutdown requested");
                self.soft_shutdown().await;
            }
            EventKind::EnterActiveMode | EventKind::EnterPassiveMode | EventKind::EnterEndMode => {
                let Some(target) = Mode::requested_by(ev.kind) else {
                    return ControlFlow::Continue(());
                };
                if self.mode == Mode::End {
                    warn!(requested = %target, "mode change ignored in end mode");
                    return ControlFlow::Continue(());
                }
                self.pinned_until = (&*ev.source == SENTINEL_SOURCE && target != Mode::End)
                    .then(|| self.schedule.next_transition(self.clock.now()));
                self.enter(target).await;
            }
            EventKind::Debug => {
                debug!(source = %ev.source, text = ev.text().unwrap_or(""), "debug event");
            }
        }
        ControlFlow::Continue(())
    }

    async fn forward(&self, note: Notification) {
        let kind = note.kind.clone();
        match self
            .notify_q
            .try_put(Work::Item(note), self.main.cfg().poll_timeout)
            .await
        {
            Ok(()) => debug!(%kind, "notification queued"),
            Err(err) => warn!(%kind, reason = err.as_label(), "notification dropped"),
        }
    }

    /// Final notification, reboot request, hard shutdown.
    async fn fatal(&mut self, source: &str, msg: &str) {
        let body = format!("{}: {source} failed: {msg}", self.cfg.proj_id);
        self.forward(Notification::new(FATAL_KIND, body)).await;
        self.flush_notifications().await;
        match self.collab.host.request_reboot().await {
            Ok(()) => warn!("reboot requested"),
            Err(err) => error!(label = err.as_label(), error = %err, "reboot request failed"),
        }
        self.hard_shutdown().await;
    }

    /// Lets the notifier deliver what is queued, then waits for it to exit.
    async fn flush_notifications(&mut self) {
        let cfg = *self.main.cfg();
        if self.notify_q.is_closed() {
            return;
        }
        if let Err(err) = self.notify_q.try_put(Work::End, cfg.poll_timeout).await {
            warn!(reason = err.as_label(), "notify queue not flushed");
            return;
        }
        if !self.main.join_all(cfg.shutdown_wait).await {
            warn!(waited = ?cfg.shutdown_wait, "notifier still busy");
        }
    }

    /// Stops the current mode's workers. Exhausted retries raise `FATAL`.
    pub async fn soft_shutdown(&mut self) {
        let Some(mut sec) = self.secondary.take() else {
            return;
        };
        match stop_with_retries(&mut sec).await {
            Ok(report) => info!(context = sec.name(), failed = report.failed, terminated = report.terminated, "mode workers stopped"),
            Err(err) => {
                error!(label = err.as_label(), error = %err.as_message(), "soft shutdown failed");
                self.bus()
                    .publish(EventMessage::new(EventKind::Fatal).with_text(err.to_string()));
            }
        }
    }

    /// Soft shutdown, then every remaining worker and queue. Terminal.
    pub async fn hard_shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.soft_shutdown().await;
        self.flush_notifications().await;
        let report = self.main.stop_all().await;
        self.stopped = true;
        info!(
            failed = report.failed,
            terminated = report.terminated,
            drained = report.drained,
            "runner stopped"
        );
    }

    async fn forced_stop(&mut self) {
        error!("forced stop");
        self.secondary = None;
        self.main.stop_all().await;
        self.stopped = true;
    }

    /// Drops every pending event except notifications.
    fn discard_stale_events(&self) {
        let bus = self.bus();
        let pending: Vec<EventMessage> = bus.drain().collect();
        let mut dropped = 0;
        for ev in pending {
            if ev.kind == EventKind::Notify {
                bus.publish(ev);
            } else {
                debug!(kind = %ev.kind, source = %ev.source, "stale event dropped");
                dropped += 1;
            }
        }
        if dropped > 0 {
            info!(dropped, "stale events discarded");
        }
    }

    /// Switches to `target`: stale events dropped, old mode stopped, new worker set started.
    pub async fn enter(&mut self, target: Mode) {
        self.discard_stale_events();
        if target == Mode::End {
            if let Some(sec) = self.secondary.as_mut() {
                if self.mode == Mode::Passive {
                    let wait = sec.cfg().shutdown_wait;
                    if !sec.join_all(wait).await {
                        info!("in-flight uploads still running; stopping them");
                    }
                }
            }
        }
        self.soft_shutdown().await;

        let previous = self.mode;
        self.mode = target;
        let mut sec = self.main.secondary(target.as_str());
        let started = match target {
            Mode::Active => self.start_active(&mut sec).await,
            Mode::Passive => {
                let files = pending_files(&[self.cfg.proj_dir.clone()], &self.cfg);
                self.start_uploads(&mut sec, files).await
            }
            Mode::End => {
                let files = pending_files(&project_dirs(&self.cfg), &self.cfg);
                self.start_uploads(&mut sec, files).await
            }
        };
        self.secondary = Some(sec);
        if let Err(err) = started {
            error!(mode = %target, label = err.as_label(), error = %err.as_message(), "mode workers failed to start");
            self.bus()
                .publish(EventMessage::new(EventKind::Fatal).with_text(err.to_string()));
        }
        info!(from = %previous, to = %target, status = %self.status().to_json(), "mode switched");
    }

    async fn start_active(&self, sec: &mut Context) -> Result<(), RuntimeError> {
        let camera = (self.collab.camera)(&self.cfg).map_err(|e| RuntimeError::StartupAborted {
            name: "COLLECT".to_string(),
            reason: e.to_string(),
        })?;
        let img_q = sec.queue(IMG_QUEUE_CAPACITY);
        let detector = Detector::new(
            Arc::clone(&self.cfg),
            img_q.clone(),
            Arc::clone(&self.collab.inference),
            Arc::clone(&self.collab.clips),
        );
        sec.spawn("DETECT", detector).await?;
        sec.spawn("COLLECT", Collector::new(camera, img_q, self.cfg.interval()))
            .await
    }

    async fn start_uploads(&self, sec: &mut Context, files: Vec<PathBuf>) -> Result<(), RuntimeError> {
        let workers = self.cfg.advanced.max_upload_workers.min(files.len());
        if workers == 0 {
            info!("nothing to upload");
            return Ok(());
        }
        let queue = sec.queue(files.len() + workers);
        for file in &files {
            // sized to fit every file plus one end marker per worker
            let _ = queue.try_put_now(Work::Item(file.clone()));
        }
        for _ in 0..workers {
            let _ = queue.try_put_now(Work::End);
        }
        info!(files = files.len(), workers, "upload pool starting");
        for i in 0..workers {
            let up = Uploader::new(
                Arc::clone(&self.cfg),
                queue.clone(),
                Arc::clone(&self.collab.transcoder),
                Arc::clone(&self.collab.store),
            );
            sec.spawn(format!("UPLOAD_{i}"), up).await?;
        }
        Ok(())
    }

    fn secondary_idle(&self) -> bool {
        self.secondary.as_ref().map_or(true, |s| s.live_count() == 0)
    }

    /// Compares the mode with the schedule; idles when they agree.
    async fn verify_mode(&mut self) {
        match self.mode {
            Mode::End => {
                if self.secondary_idle() {
                    info!("end-of-project uploads finished");
                    self.bus().publish(
                        EventMessage::new(EventKind::HardShutdown).with_text("project complete"),
                    );
                }
                return;
            }
            Mode::Active if self.cfg.source.is_some() && self.secondary_idle() => {
                info!("replay source exhausted");
                self.bus().publish(
                    EventMessage::new(EventKind::HardShutdown).with_text("replay finished"),
                );
                return;
            }
            _ => {}
        }

        let now = self.clock.now();
        if let Some(until_t) = self.pinned_until {
            if until_t.is_some_and(|t| now >= t) {
                info!(mode = %self.mode, "forced mode released");
                self.pinned_until = None;
            }
        }
        if self.pinned_until.is_none() {
            let expected = self.schedule.expected_mode(now);
            if expected != self.mode {
                info!(current = %self.mode, %expected, "schedule mismatch");
                self.bus().publish(EventMessage::new(expected.entry_event()));
                return;
            }
        }

        let idle = self.idle_budget(now);
        tokio::select! {
            biased;
            _ = self.force.cancelled() => {}
            _ = self.main.bus().wait_ready(idle) => {}
        }
    }

    /// Longest idle wait that cannot miss a transition, the project end or `kill_after`.
    fn idle_budget(&self, now: NaiveDateTime) -> Duration {
        let mut budget = self.cfg.max_idle();
        if let Some(next) = self.schedule.next_transition(now) {
            budget = budget.min(until(now, next));
        }
        if let Some(end) = self.cfg.end {
            budget = budget.min(until(now, end));
        }
        if let Some(limit) = self.cfg.kill_after {
            budget = budget.min(limit.saturating_sub(self.started.elapsed()));
        }
        budget
    }
}

#[async_trait]
impl Worker for Runner {
    async fn startup(&mut self, ctx: &WorkerCtx) -> Result<(), WorkerError> {
        self.force = ctx.shutdown.clone();
        self.start().await.map_err(|e| WorkerError::fatal(e.to_string()))
    }

    async fn main_loop(&mut self, _ctx: &WorkerCtx) -> Result<(), WorkerError> {
        self.run().await;
        Ok(())
    }

    async fn shutdown(&mut self, _ctx: &WorkerCtx) -> Result<(), WorkerError> {
        if !self.stopped {
            self.forced_stop().await;
        }
        Ok(())
    }
}

/// Runs a device to completion: signal escalation wired to the runner's bus, the
/// runner driven as a worker in the current task.
pub async fn launch(cfg: Config, collab: Collaborators) -> ExitStatus {
    let cfg = Arc::new(cfg);
    let force = CancellationToken::new();
    let runner = Runner::new(Arc::clone(&cfg), collab).with_force_token(force.clone());
    let bus = runner.bus().clone();
    let signals = spawn_signal_escalation(bus.clone(), force.clone(), cfg.advanced.max_tries);

    let ctx = WorkerCtx::new("RUNNER", force.clone(), bus, cfg.supervision());
    let (started, _ack) = oneshot::channel();
    let status = run_worker(runner, ctx, started)
        .instrument(device_span(&cfg.proj_id))
        .await;

    force.cancel();
    if let Err(err) = signals.await {
        debug!(error = %err, "signal listener ended abnormally");
    }
    info!(code = status.code(), "device stopped");
    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{
        fast_supervision, mock_collab, scripted_camera, spawning_dets, test_config, FixedClock,
        FixedSchedule, MockInference, Mocks, Wedged,
    };
    use crate::workers::SPAWNING_KIND;
    use chrono::NaiveDate;
    use std::sync::atomic::Ordering;

    fn noon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 2)
            .and_then(|d| d.and_hms_opt(12, 0, 0))
            .unwrap()
    }

    struct Rig {
        runner: Runner,
        mocks: Mocks,
        schedule: FixedSchedule,
        clock: FixedClock,
        cfg: Arc<Config>,
        _dir: tempfile::TempDir,
    }

    fn rig_with(frames: u32, inference: MockInference, mode: Mode, tweak: impl FnOnce(&mut Config)) -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config(dir.path());
        cfg.advanced.max_idle_secs = 0;
        tweak(&mut cfg);
        let cfg = Arc::new(cfg);
        let (collab, mocks) = mock_collab(scripted_camera(frames), inference);
        let schedule = FixedSchedule::new(mode);
        let clock = FixedClock::at(noon());
        let runner = Runner::with_supervision(Arc::clone(&cfg), collab, fast_supervision())
            .with_clock(Arc::new(clock.clone()))
            .with_schedule(Arc::new(schedule.clone()));
        Rig {
            runner,
            mocks,
            schedule,
            clock,
            cfg,
            _dir: dir,
        }
    }

    fn rig(mode: Mode) -> Rig {
        rig_with(0, MockInference::default(), mode, |_| {})
    }

    async fn run_to_end(runner: &mut Runner) {
        tokio::time::timeout(Duration::from_secs(10), runner.run())
            .await
            .expect("runner did not finish");
    }

    #[tokio::test]
    async fn test_starts_in_scheduled_mode_with_notifier() {
        let mut r = rig(Mode::Active);
        r.runner.start().await.unwrap();
        assert_eq!(r.runner.mode(), Mode::Active);
        let status = r.runner.status();
        assert_eq!(status.mode, Mode::Active);
        assert!(status.idle_secs.is_some());
        assert!(status.live_workers.iter().any(|w| w == "NOTIFY"));
        r.runner.hard_shutdown().await;
        assert!(r.runner.is_stopped());
        assert!(r.runner.status().live_workers.is_empty());
    }

    #[tokio::test]
    async fn test_notifications_survive_mode_switch() {
        let mut r = rig(Mode::Active);
        r.runner.start().await.unwrap();
        let bus = r.runner.bus().clone();
        bus.publish(EventMessage::new(EventKind::Debug));
        bus.publish(EventMessage::new(EventKind::Notify).with_text("keep me"));
        bus.publish(EventMessage::new(EventKind::EnterActiveMode));

        r.runner.enter(Mode::Passive).await;
        let left: Vec<EventMessage> = bus.drain().collect();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].kind, EventKind::Notify);
        assert_eq!(left[0].text(), Some("keep me"));
        assert_eq!(r.runner.mode(), Mode::Passive);
        r.runner.hard_shutdown().await;
    }

    #[tokio::test]
    async fn test_schedule_drives_mode_changes() {
        let mut r = rig(Mode::Active);
        r.runner.start().await.unwrap();

        assert!(r.runner.tick().await.is_continue());
        assert!(r.runner.bus().is_empty());
        assert_eq!(r.runner.mode(), Mode::Active);

        r.schedule.set(Mode::Passive);
        assert!(r.runner.tick().await.is_continue());
        let pending: Vec<EventKind> = r.runner.bus().drain().map(|e| e.kind).collect();
        assert_eq!(pending, vec![EventKind::EnterPassiveMode]);

        r.runner.bus().publish(EventMessage::new(EventKind::EnterPassiveMode));
        assert!(r.runner.tick().await.is_continue());
        assert_eq!(r.runner.mode(), Mode::Passive);
        assert!(r.runner.tick().await.is_continue());
        assert!(r.runner.bus().is_empty());
        r.runner.hard_shutdown().await;
    }

    #[tokio::test]
    async fn test_sentinel_forces_mode_until_next_transition() {
        let mut r = rig(Mode::Active);
        r.runner.start().await.unwrap();
        let sentinels = SentinelDir::new(r.cfg.sentinel_dir.clone());
        let file = sentinels.request(EventKind::EnterPassiveMode).unwrap();

        assert!(r.runner.tick().await.is_continue());
        assert!(!file.exists());
        assert_eq!(r.runner.mode(), Mode::Passive);

        // the schedule still says Active, but a forced mode holds
        assert!(r.runner.tick().await.is_continue());
        assert!(r.runner.bus().is_empty());
        assert_eq!(r.runner.mode(), Mode::Passive);

        sentinels.request(EventKind::HardShutdown).unwrap();
        assert!(r.runner.tick().await.is_break());
        assert!(r.runner.is_stopped());
    }

    #[tokio::test]
    async fn test_fatal_notifies_then_reboots_and_stops() {
        let mut r = rig(Mode::Active);
        r.runner.start().await.unwrap();
        r.runner.bus().publish(
            EventMessage::new(EventKind::Fatal)
                .with_source("DETECT")
                .with_text("inference failing"),
        );
        assert!(r.runner.tick().await.is_break());
        assert!(r.runner.is_stopped());
        assert_eq!(r.mocks.host.reboots.load(Ordering::SeqCst), 1);

        let delivered = r.mocks.mailer.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].kind, FATAL_KIND);
        assert!(delivered[0].body.contains("DETECT"));
    }

    #[tokio::test]
    async fn test_soft_shutdown_keeps_runner_alive() {
        let mut r = rig(Mode::Active);
        r.runner.start().await.unwrap();
        r.runner
            .bus()
            .publish(EventMessage::new(EventKind::SoftShutdown));
        assert!(r.runner.tick().await.is_continue());
        assert!(!r.runner.is_stopped());
        assert_eq!(r.runner.status().live_workers, vec!["NOTIFY".to_string()]);
        r.runner.hard_shutdown().await;
    }

    #[tokio::test]
    async fn test_active_pipeline_delivers_spawning_notification() {
        let mut r = rig_with(
            10,
            MockInference::always(spawning_dets()),
            Mode::Active,
            |cfg| cfg.source = Some(PathBuf::from("replay")),
        );
        r.runner.start().await.unwrap();
        run_to_end(&mut r.runner).await;

        assert!(r.runner.is_stopped());
        let delivered = r.mocks.mailer.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].kind, SPAWNING_KIND);
        assert!(delivered[0].attachment.is_some());
        assert_eq!(r.mocks.clips.written.lock().unwrap().len(), 1);
        assert_eq!(r.mocks.inference.calls.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_project_end_uploads_every_project_then_stops() {
        let mut r = rig(Mode::Active);
        let other = r.cfg.data_dir.join("xyz_t2_mz_010124").join("Videos");
        std::fs::create_dir_all(&other).unwrap();
        std::fs::write(other.join("old.mp4"), b"x").unwrap();
        std::fs::write(r.cfg.video_dir.join("new.mp4"), b"x").unwrap();
        let end_at = noon() + chrono::Duration::hours(1);
        let mut cfg = (*r.cfg).clone();
        cfg.end = Some(end_at);
        r.runner.cfg = Arc::new(cfg);

        r.runner.start().await.unwrap();
        assert_eq!(r.runner.mode(), Mode::Active);

        r.clock.set(end_at);
        run_to_end(&mut r.runner).await;

        assert_eq!(r.runner.mode(), Mode::End);
        let mut uploaded = r.mocks.store.uploaded.lock().unwrap().clone();
        uploaded.sort();
        assert_eq!(
            uploaded,
            vec![
                "abc_t1_mz_050124/Videos/new.mp4".to_string(),
                "xyz_t2_mz_010124/Videos/old.mp4".to_string(),
            ]
        );
        assert!(!other.join("old.mp4").exists());
    }

    #[tokio::test]
    async fn test_project_end_survives_queued_mode_switch() {
        let mut r = rig(Mode::Active);
        let end_at = noon() + chrono::Duration::hours(1);
        let mut cfg = (*r.cfg).clone();
        cfg.end = Some(end_at);
        r.runner.cfg = Arc::new(cfg);
        r.runner.start().await.unwrap();

        r.runner.bus().publish(EventMessage::new(EventKind::EnterPassiveMode));
        r.clock.set(end_at + chrono::Duration::minutes(1));
        for _ in 0..20 {
            if r.runner.tick().await.is_break() {
                break;
            }
        }
        assert_eq!(r.runner.mode(), Mode::End);
        assert!(r.runner.is_stopped());
    }

    #[tokio::test]
    async fn test_kill_after_survives_queued_mode_switch() {
        let mut r = rig_with(0, MockInference::default(), Mode::Active, |cfg| {
            cfg.kill_after = Some(Duration::ZERO)
        });
        r.runner.start().await.unwrap();
        r.runner.bus().publish(EventMessage::new(EventKind::EnterPassiveMode));
        for _ in 0..10 {
            if r.runner.tick().await.is_break() {
                break;
            }
        }
        assert!(r.runner.is_stopped());
    }

    #[tokio::test]
    async fn test_shutdown_sentinel_wins_over_mode_sentinel() {
        let mut r = rig(Mode::Active);
        r.runner.start().await.unwrap();
        let sentinels = SentinelDir::new(r.cfg.sentinel_dir.clone());
        sentinels.request(EventKind::EnterPassiveMode).unwrap();
        sentinels.request(EventKind::HardShutdown).unwrap();

        assert!(r.runner.tick().await.is_break());
        assert!(r.runner.is_stopped());
        assert_eq!(r.runner.mode(), Mode::Active);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unstoppable_mode_worker_raises_fatal() {
        let mut r = rig(Mode::Active);
        r.runner.start().await.unwrap();
        r.runner.soft_shutdown().await;
        r.runner.bus().drain().for_each(drop);

        let mut sec = r.runner.main.secondary("stuck");
        sec.spawn("WEDGED", Wedged(Duration::from_secs(5))).await.unwrap();
        r.runner.secondary = Some(sec);

        r.runner.soft_shutdown().await;
        let fatal: Vec<EventMessage> = r
            .runner
            .bus()
            .drain()
            .filter(|e| e.kind == EventKind::Fatal)
            .collect();
        assert_eq!(fatal.len(), 1);
        assert!(fatal[0].text().is_some_and(|t| t.contains("stuck")));
        assert!(!r.runner.is_stopped());
    }
}
