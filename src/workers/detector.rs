//! # Detector: queue-driven inference and event detection.
//!
//! Each frame from the image queue goes through inference and into the
//! [`HitAlgorithm`]. When the hit count reaches its threshold the buffered frames are
//! annotated, written as one clip under the project video directory, and a NOTIFY
//! event carrying the clip is published for the runner to forward.
//!
//! A failed inference skips that frame. `max_tries` consecutive failures are fatal.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use image::RgbImage;
use tracing::{debug, info, warn};

use crate::collab::{CapturedFrame, ClipWriter, Inference};
use crate::config::Config;
use crate::detection::{overlay_boxes, Evidence, HitAlgorithm};
use crate::error::WorkerError;
use crate::events::{EventKind, EventMessage, Notification};
use crate::queue::{MsgQueue, Work};
use crate::worker::{queue_loop, QueueWorker, Worker, WorkerCtx};

pub const SPAWNING_KIND: &str = "possible spawning event";

pub struct Detector {
    cfg: Arc<Config>,
    input: MsgQueue<Work<CapturedFrame>>,
    inference: Arc<dyn Inference>,
    clips: Arc<dyn ClipWriter>,
    algo: HitAlgorithm<RgbImage>,
    inference_failures: u32,
    frames: u64,
    triggers: u64,
    busy: Duration,
}

impl Detector {
    pub fn new(
        cfg: Arc<Config>,
        input: MsgQueue<Work<CapturedFrame>>,
        inference: Arc<dyn Inference>,
        clips: Arc<dyn ClipWriter>,
    ) -> Self {
        Self {
            algo: HitAlgorithm::new(cfg.hit_params()),
            cfg,
            input,
            inference,
            clips,
            inference_failures: 0,
            frames: 0,
            triggers: 0,
            busy: Duration::ZERO,
        }
    }

    pub fn hits(&self) -> u32 {
        self.algo.hits()
    }

    pub fn triggers(&self) -> u64 {
        self.triggers
    }

    fn clip_path(&self, last_ms: i64) -> PathBuf {
        self.cfg.video_dir.join(format!(
            "{}_{last_ms}.{}",
            self.cfg.proj_id, self.cfg.advanced.std_ext
        ))
    }

    async fn report(&mut self, evidence: Evidence<RgbImage>, ctx: &WorkerCtx) {
        self.triggers += 1;
        let first_ms = evidence.frames.first().map_or(0, |f| f.captured_ms);
        let last_ms = evidence.frames.last().map_or(0, |f| f.captured_ms);
        let count = evidence.frames.len();
        let site_class = self.cfg.site_class;
        let annotated = tokio::task::spawn_blocking(move || {
            evidence
                .frames
                .into_iter()
                .map(|mut f| {
                    overlay_boxes(&mut f.frame, &f.detections, site_class);
                    f.frame
                })
                .collect::<Vec<RgbImage>>()
        })
        .await;

        let dest = self.clip_path(last_ms);
        let body = format!(
            "{}: {count} frames between {first_ms} and {last_ms} ms met the hit threshold.",
            self.cfg.proj_id,
        );
        let mut note = Notification::new(SPAWNING_KIND, body);
        let written = match annotated {
            Ok(frames) => self.clips.write_clip(frames, &dest).await,
            Err(err) => Err(err.into()),
        };
        match written {
            Ok(()) => {
                info!(clip = %dest.display(), frames = count, "evidence clip written");
                note = note.with_attachment(dest);
            }
            Err(err) => {
                warn!(label = err.as_label(), error = %err, "evidence clip not written; notifying without it");
            }
        }
        ctx.emit(EventMessage::new(EventKind::Notify).with_notification(note));
    }
}

#[async_trait]
impl QueueWorker for Detector {
    type Item = CapturedFrame;

    fn work_queue(&self) -> MsgQueue<Work<CapturedFrame>> {
        self.input.clone()
    }

    async fn main_func(&mut self, item: CapturedFrame, ctx: &WorkerCtx) -> Result<(), WorkerError> {
        let started = Instant::now();
        let dets = match self.inference.detect(&item.image).await {
            Ok(dets) => {
                self.inference_failures = 0;
                dets
            }
            Err(err) => {
                self.inference_failures += 1;
                warn!(label = err.as_label(), error = %err, failures = self.inference_failures, "inference failed; frame skipped");
                if self.inference_failures >= ctx.cfg.tries() {
                    return Err(WorkerError::fatal(format!("inference failing: {err}")));
                }
                return Ok(());
            }
        };
        self.busy += started.elapsed();
        self.frames += 1;

        if let Some(evidence) = self.algo.process(item.captured_ms, item.image, &dets) {
            self.report(evidence, ctx).await;
        } else {
            debug!(hits = self.algo.hits(), "frame processed");
        }
        Ok(())
    }
}

#[async_trait]
impl Worker for Detector {
    async fn main_loop(&mut self, ctx: &WorkerCtx) -> Result<(), WorkerError> {
        queue_loop(self, ctx).await
    }

    async fn shutdown(&mut self, _ctx: &WorkerCtx) -> Result<(), WorkerError> {
        let avg_ms = if self.frames == 0 {
            0.0
        } else {
            self.busy.as_secs_f64() * 1000.0 / self.frames as f64
        };
        let dropped = self.algo.flush().len();
        info!(
            frames = self.frames,
            triggers = self.triggers,
            avg_inference_ms = avg_ms,
            dropped,
            "detector stopping"
        );
        Ok(())
    }
}
