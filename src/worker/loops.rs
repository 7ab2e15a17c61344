//! # Scheduling variants.
//!
//! Both loops re-check the shutdown token after every bounded wait, so the worst-case
//! stop latency is one `timer_slice` or one `poll_timeout` plus the current `main_func`.

use std::ops::ControlFlow;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

use super::WorkerCtx;
use crate::error::WorkerError;
use crate::queue::{MsgQueue, Work};

/// Worker that runs `main_func` once per interval.
#[async_trait]
pub trait TimerWorker: Send + 'static {
    /// Current interval; re-read after every tick so it may adapt.
    fn interval(&self) -> Duration;

    /// One tick. `Break` ends the loop normally.
    async fn main_func(&mut self, ctx: &WorkerCtx) -> Result<ControlFlow<()>, WorkerError>;
}

/// Runs `main_func` on absolute deadlines until shutdown or `Break`.
///
/// The first tick fires one interval after entry. A late tick fires once immediately;
/// missed ticks are not replayed.
pub async fn timer_loop<W: TimerWorker + ?Sized>(
    worker: &mut W,
    ctx: &WorkerCtx,
) -> Result<(), WorkerError> {
    let mut next = Instant::now() + worker.interval();
    loop {
        if ctx.is_shutdown() {
            return Ok(());
        }
        let now = Instant::now();
        if now >= next {
            if worker.main_func(ctx).await?.is_break() {
                debug!("timer loop finished");
                return Ok(());
            }
            next += worker.interval();
            let now = Instant::now();
            if next < now {
                next = now;
            }
            continue;
        }
        let wake = next.min(now + ctx.cfg.timer_slice);
        tokio::select! {
            biased;
            _ = ctx.shutdown.cancelled() => return Ok(()),
            _ = sleep_until(wake) => {}
        }
    }
}

/// Worker that consumes an injected work queue.
#[async_trait]
pub trait QueueWorker: Send + 'static {
    type Item: Send + 'static;

    /// The queue this worker reads from.
    fn work_queue(&self) -> MsgQueue<Work<Self::Item>>;

    /// Handles one item.
    async fn main_func(&mut self, item: Self::Item, ctx: &WorkerCtx) -> Result<(), WorkerError>;
}

/// Consumes the work queue until `Work::End`, a closed queue, or shutdown.
pub async fn queue_loop<W: QueueWorker + ?Sized>(
    worker: &mut W,
    ctx: &WorkerCtx,
) -> Result<(), WorkerError> {
    let queue = worker.work_queue();
    loop {
        let next = tokio::select! {
            biased;
            _ = ctx.shutdown.cancelled() => return Ok(()),
            next = queue.try_get(ctx.cfg.poll_timeout) => next,
        };
        match next {
            Some(Work::Item(item)) => worker.main_func(item, ctx).await?,
            Some(Work::End) => {
                debug!("end of stream");
                return Ok(());
            }
            None if queue.is_closed() => {
                debug!("work queue closed");
                return Ok(());
            }
            None => continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SupervisionConfig;
    use crate::events::Bus;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> WorkerCtx {
        let cfg = SupervisionConfig::default().with_poll_timeout(Duration::from_millis(10));
        WorkerCtx::new("T", CancellationToken::new(), Bus::new(8), cfg)
    }

    struct Ticker {
        ticks: u32,
        stop_at: u32,
    }

    #[async_trait]
    impl TimerWorker for Ticker {
        fn interval(&self) -> Duration {
            Duration::from_millis(5)
        }

        async fn main_func(&mut self, _ctx: &WorkerCtx) -> Result<ControlFlow<()>, WorkerError> {
            self.ticks += 1;
            if self.ticks >= self.stop_at {
                Ok(ControlFlow::Break(()))
            } else {
                Ok(ControlFlow::Continue(()))
            }
        }
    }

    #[tokio::test]
    async fn test_timer_loop_runs_until_break() {
        let mut w = Ticker { ticks: 0, stop_at: 4 };
        timer_loop(&mut w, &ctx()).await.unwrap();
        assert_eq!(w.ticks, 4);
    }

    #[tokio::test]
    async fn test_timer_loop_stops_on_shutdown() {
        let ctx = ctx();
        ctx.shutdown.cancel();
        let mut w = Ticker { ticks: 0, stop_at: 100 };
        timer_loop(&mut w, &ctx).await.unwrap();
        assert_eq!(w.ticks, 0);
    }

    struct Summer {
        queue: MsgQueue<Work<u32>>,
        total: u32,
    }

    #[async_trait]
    impl QueueWorker for Summer {
        type Item = u32;

        fn work_queue(&self) -> MsgQueue<Work<u32>> {
            self.queue.clone()
        }

        async fn main_func(&mut self, item: u32, _ctx: &WorkerCtx) -> Result<(), WorkerError> {
            self.total += item;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_queue_loop_stops_at_end_marker() {
        let queue = MsgQueue::new(8);
        for i in 1..=3 {
            queue.try_put_now(Work::Item(i)).unwrap();
        }
        queue.try_put_now(Work::End).unwrap();
        queue.try_put_now(Work::Item(100)).unwrap();

        let mut w = Summer {
            queue: queue.clone(),
            total: 0,
        };
        queue_loop(&mut w, &ctx()).await.unwrap();
        assert_eq!(w.total, 6);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_queue_loop_survives_empty_polls_then_stops_on_shutdown() {
        let ctx = ctx();
        let token = ctx.shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });
        let mut w = Summer {
            queue: MsgQueue::new(1),
            total: 0,
        };
        queue_loop(&mut w, &ctx).await.unwrap();
        assert_eq!(w.total, 0);
    }

    #[tokio::test]
    async fn test_queue_loop_ends_on_closed_queue() {
        let queue = MsgQueue::new(1);
        queue.close();
        let mut w = Summer { queue, total: 0 };
        queue_loop(&mut w, &ctx()).await.unwrap();
    }
}
