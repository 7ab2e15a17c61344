//! # fishvisor
//!
//! **fishvisor** runs an unattended camera-and-inference edge device: frames are
//! captured on a timer, run through an object detector, and a sustained burst of
//! "two subjects at one site" detections becomes an evidence clip and an operator
//! notification. Around that pipeline sits a small supervision layer (workers,
//! supervisors, contexts, bounded queues, an event bus) and a runner that switches
//! between operating modes on a daily schedule or an operator override.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!                        ┌───────────────────────────────────────┐
//!   sentinel files ────► │ Runner (state machine, itself a Worker)│ ◄──── OS signals
//!   schedule / clock ──► │  Active | Passive | End                │        (HARD_SHUTDOWN,
//!                        └───┬──────────────────────────┬─────────┘         then force)
//!                            │ owns                     │ pops
//!                            ▼                          │
//!   ┌──────────────────────────────────────────┐       │
//!   │ Context "main"  (token T0, bus B)         │ ◄─────┘
//!   │  queues: [B, notify]   procs: [NOTIFY]    │
//!   │  └── secondary per mode (token T0.child)  │
//!   │       Active : COLLECT ─img q─► DETECT ───┼──► B (NOTIFY, FATAL)
//!   │       Passive: UPLOAD_0..n ◄─file q       │
//!   │       End    : UPLOAD_0..n over all projects
//!   └──────────────────────────────────────────┘
//! ```
//!
//! ### Worker lifecycle
//! ```text
//! Supervisor::spawn ──► tokio task: run_worker()
//!   startup() ─► ack ─► main_loop() ─► shutdown()       (exactly once)
//!        │                   │
//!        └── error / panic ──┴─► FATAL on the bus, ExitStatus::Failed
//!
//! Context::stop_all()
//!   cancel token ─► join (shared deadline) ─► terminate stragglers ─► drain + close queues
//! ```
//!
//! ## Features
//! | Area              | Description                                                   | Key types                                   |
//! |-------------------|---------------------------------------------------------------|---------------------------------------------|
//! | **Queues**        | Bounded FIFO, every operation timeout-bounded                 | [`MsgQueue`], [`Work`]                      |
//! | **Events**        | Typed messages to the runner                                  | [`Bus`], [`EventMessage`], [`EventKind`]    |
//! | **Workers**       | Lifecycle hooks, timer and queue loops                        | [`Worker`], [`TimerWorker`], [`QueueWorker`]|
//! | **Supervision**   | Bounded startup, graceful stop with forced fallback           | [`Supervisor`], [`Context`]                 |
//! | **Orchestration** | Mode state machine, overrides, escalation                     | [`Runner`], [`Mode`], [`launch`]            |
//! | **Detection**     | Hit counting with a rolling evidence buffer                   | [`detection::HitAlgorithm`]                 |
//! | **Policies**      | Backoff and bounded retries                                   | [`BackoffPolicy`], [`RetryPolicy`]          |
//! | **Configuration** | Validated project config and supervision timing               | [`Config`], [`SupervisionConfig`]           |
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use fishvisor::collab::{Collaborators, CommandHost, FfmpegClipWriter, FfmpegTranscoder, RcloneStore};
//! use fishvisor::observability::{init_logging, LogFormat};
//! use fishvisor::Config;
//! # use fishvisor::collab::{CollabError, Inference, Mailer};
//! # use fishvisor::detection::Detection;
//! # use fishvisor::Notification;
//! # struct Model;
//! # #[async_trait::async_trait]
//! # impl Inference for Model {
//! #     async fn detect(&self, _: &image::RgbImage) -> Result<Vec<Detection>, CollabError> { Ok(vec![]) }
//! # }
//! # struct Smtp;
//! # #[async_trait::async_trait]
//! # impl Mailer for Smtp {
//! #     async fn deliver(&self, _: &Notification, _: &str) -> Result<(), CollabError> { Ok(()) }
//! # }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     init_logging(LogFormat::Json);
//!     let cfg = Config::load("project.json".as_ref())?;
//!     let collab = Collaborators {
//!         camera: Collaborators::replay_camera(),
//!         inference: Arc::new(Model),
//!         clips: Arc::new(FfmpegClipWriter::new(cfg.advanced.framerate)),
//!         transcoder: Arc::new(FfmpegTranscoder::new(cfg.advanced.framerate)),
//!         store: Arc::new(RcloneStore::new(cfg.cloud_root.clone())),
//!         mailer: Arc::new(Smtp),
//!         host: Arc::new(CommandHost::default()),
//!     };
//!     let status = fishvisor::launch(cfg, collab).await;
//!     std::process::exit(status.code());
//! }
//! ```
mod config;
mod core;
mod error;
mod events;
mod policies;
mod queue;
mod runner;
mod worker;
mod workers;

pub mod collab;
pub mod detection;
pub mod observability;

#[cfg(test)]
mod testkit;

// ---- Public re-exports ----

pub use config::{AdvancedConfig, Config, ConfigError, RawConfig};
pub use core::{
    spawn_signal_escalation, stop_with_retries, wait_for_shutdown_signal, Context, StopReport,
    SupervisionConfig, Supervisor,
};
pub use error::{RuntimeError, WorkerError};
pub use events::{Bus, EventKind, EventMessage, Notification, Payload, UnknownEventKind};
pub use policies::{BackoffPolicy, JitterPolicy, RetryError, RetryPolicy};
pub use queue::{MsgQueue, PutError, QueueHandle, Work};
pub use runner::{
    launch, Clock, DailySchedule, HostReadings, Mode, Runner, Schedule, SentinelDir, StatusReport,
    SystemClock, FATAL_KIND, SENTINEL_SOURCE,
};
pub use worker::{
    queue_loop, run_worker, timer_loop, ExitStatus, QueueWorker, TimerWorker, Worker, WorkerCtx,
};
pub use workers::{
    pending_files, project_dirs, Collector, Detector, Notifier, Uploader, SPAWNING_KIND,
};
