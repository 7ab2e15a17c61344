//! # Collector: timer-driven frame capture.
//!
//! Captures one frame per interval and offers it to the image queue without waiting.
//! Congestion policy: a frame that does not fit is kept and offered again on the next
//! tick before anything new is captured, and the interval backs off (×2 per congested
//! tick, at most ×8). The first successful put restores the base interval. Nothing is
//! silently dropped.
//!
//! ```text
//! tick ─► pending? ──yes──► offer pending ─┐
//!           └─no──► camera.capture() ──────┤
//!                     └─ None ─► put End ─► Break
//!          offer: Ok ─► interval = base;  Full ─► keep pending, interval = backoff(n)
//! ```

use std::ops::ControlFlow;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::collab::{Camera, CapturedFrame};
use crate::error::WorkerError;
use crate::policies::BackoffPolicy;
use crate::queue::{MsgQueue, PutError, Work};
use crate::worker::{timer_loop, TimerWorker, Worker, WorkerCtx};

const SLOWDOWN_FACTOR: f64 = 2.0;
const SLOWDOWN_CAP: u32 = 8;

pub struct Collector {
    camera: Box<dyn Camera>,
    out: MsgQueue<Work<CapturedFrame>>,
    base: Duration,
    slowdown: BackoffPolicy,
    congested: u32,
    pending: Option<CapturedFrame>,
    capture_failures: u32,
    captured: u64,
}

impl Collector {
    pub fn new(camera: Box<dyn Camera>, out: MsgQueue<Work<CapturedFrame>>, base: Duration) -> Self {
        Self {
            camera,
            out,
            base,
            slowdown: BackoffPolicy::capped_multiple(base, SLOWDOWN_FACTOR, SLOWDOWN_CAP),
            congested: 0,
            pending: None,
            capture_failures: 0,
            captured: 0,
        }
    }

    async fn finish(&mut self, ctx: &WorkerCtx) {
        while !ctx.is_shutdown() {
            match self.out.try_put(Work::End, ctx.cfg.poll_timeout).await {
                Ok(()) => {
                    info!(frames = self.captured, "end of source");
                    return;
                }
                Err(PutError::Closed(_)) => return,
                Err(PutError::Full(_)) => continue,
            }
        }
    }
}

#[async_trait]
impl TimerWorker for Collector {
    fn interval(&self) -> Duration {
        if self.congested == 0 {
            self.base
        } else {
            self.slowdown.delay(self.congested)
        }
    }

    async fn main_func(&mut self, ctx: &WorkerCtx) -> Result<ControlFlow<()>, WorkerError> {
        let frame = match self.pending.take() {
            Some(frame) => frame,
            None => match self.camera.capture().await {
                Ok(Some(frame)) => {
                    self.capture_failures = 0;
                    frame
                }
                Ok(None) => {
                    self.finish(ctx).await;
                    return Ok(ControlFlow::Break(()));
                }
                Err(err) => {
                    self.capture_failures += 1;
                    warn!(label = err.as_label(), error = %err, failures = self.capture_failures, "capture failed");
                    if self.capture_failures >= ctx.cfg.tries() {
                        return Err(WorkerError::fatal(format!("camera failing: {err}")));
                    }
                    return Ok(ControlFlow::Continue(()));
                }
            },
        };

        match self.out.try_put_now(Work::Item(frame)) {
            Ok(()) => {
                if self.congested > 0 {
                    info!(after = self.congested, "image queue drained; base interval restored");
                }
                self.congested = 0;
                self.captured += 1;
                debug!(frames = self.captured, "frame queued");
            }
            Err(PutError::Full(work)) => {
                self.pending = work.into_item();
                self.congested = self.congested.saturating_add(1);
                warn!(congested = self.congested, interval = ?self.interval(), "image queue full; slowing down");
            }
            Err(PutError::Closed(_)) => {
                debug!("image queue closed");
                return Ok(ControlFlow::Break(()));
            }
        }
        Ok(ControlFlow::Continue(()))
    }
}

#[async_trait]
impl Worker for Collector {
    async fn startup(&mut self, _ctx: &WorkerCtx) -> Result<(), WorkerError> {
        self.camera
            .start()
            .await
            .map_err(|e| WorkerError::fail(format!("camera start: {e}")))
    }

    async fn main_loop(&mut self, ctx: &WorkerCtx) -> Result<(), WorkerError> {
        timer_loop(self, ctx).await
    }

    async fn shutdown(&mut self, _ctx: &WorkerCtx) -> Result<(), WorkerError> {
        info!(frames = self.captured, "collector stopping");
        self.camera
            .stop()
            .await
            .map_err(|e| WorkerError::fail(format!("camera stop: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Bus;
    use crate::testkit::{worker_ctx, ScriptedCamera};

    fn collector(frames: u32, capacity: usize) -> (Collector, MsgQueue<Work<CapturedFrame>>) {
        let q = MsgQueue::new(capacity);
        let cam = Box::new(ScriptedCamera {
            remaining: frames,
            next_ms: 0,
        });
        (Collector::new(cam, q.clone(), Duration::from_millis(100)), q)
    }

    #[tokio::test]
    async fn test_full_queue_keeps_pending_frame_and_slows_down() {
        let (mut c, q) = collector(5, 1);
        let ctx = worker_ctx("COLLECT", &Bus::new(4));

        c.main_func(&ctx).await.unwrap();
        assert_eq!(q.len(), 1);
        assert_eq!(c.interval(), Duration::from_millis(100));

        c.main_func(&ctx).await.unwrap();
        assert!(c.pending.is_some());
        assert_eq!(c.interval(), Duration::from_millis(200));
        c.main_func(&ctx).await.unwrap();
        assert_eq!(c.interval(), Duration::from_millis(400));

        let first = q.try_get_now().unwrap().into_item().unwrap();
        assert_eq!(first.captured_ms, 10);

        c.main_func(&ctx).await.unwrap();
        assert!(c.pending.is_none());
        assert_eq!(c.interval(), Duration::from_millis(100));
        let second = q.try_get_now().unwrap().into_item().unwrap();
        assert_eq!(second.captured_ms, 20);
    }

    #[tokio::test]
    async fn test_slowdown_is_capped() {
        let (mut c, _q) = collector(20, 1);
        let ctx = worker_ctx("COLLECT", &Bus::new(4));
        for _ in 0..10 {
            c.main_func(&ctx).await.unwrap();
        }
        assert_eq!(c.interval(), Duration::from_millis(800));
    }

    #[tokio::test]
    async fn test_end_of_source_enqueues_end_marker() {
        let (mut c, q) = collector(2, 8);
        let ctx = worker_ctx("COLLECT", &Bus::new(4));
        assert!(c.main_func(&ctx).await.unwrap().is_continue());
        assert!(c.main_func(&ctx).await.unwrap().is_continue());
        assert!(c.main_func(&ctx).await.unwrap().is_break());
        let items: Vec<_> = q.drain().collect();
        assert_eq!(items.len(), 3);
        assert!(items[2].is_end());
    }
}
