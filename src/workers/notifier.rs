//! # Notifier: rate-limited operator notifications.
//!
//! A notification is suppressed when its `kind` matches the last delivered one and it
//! was created less than `min_notification_interval` after it. Delivery is retried;
//! a notification that still fails is logged and dropped.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::collab::Mailer;
use crate::config::Config;
use crate::error::WorkerError;
use crate::events::Notification;
use crate::policies::{BackoffPolicy, RetryError, RetryPolicy};
use crate::queue::{MsgQueue, Work};
use crate::worker::{queue_loop, QueueWorker, Worker, WorkerCtx};

pub struct Notifier {
    cfg: Arc<Config>,
    input: MsgQueue<Work<Notification>>,
    mailer: Arc<dyn Mailer>,
    retry: RetryPolicy,
    min_interval: Duration,
    last: Option<Notification>,
    sent: u32,
    suppressed: u32,
}

impl Notifier {
    pub fn new(cfg: Arc<Config>, input: MsgQueue<Work<Notification>>, mailer: Arc<dyn Mailer>) -> Self {
        Self {
            retry: RetryPolicy::new(cfg.advanced.max_tries, BackoffPolicy::default()),
            min_interval: cfg.min_notification_interval(),
            cfg,
            input,
            mailer,
            last: None,
            sent: 0,
            suppressed: 0,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// True if `note` repeats the last delivered kind within the minimum interval.
    pub fn is_suppressed(&self, note: &Notification) -> bool {
        let Some(last) = &self.last else {
            return false;
        };
        if last.kind != note.kind {
            return false;
        }
        match note.created.signed_duration_since(last.created).to_std() {
            Ok(elapsed) => elapsed < self.min_interval,
            // created before the last delivery
            Err(_) => true,
        }
    }
}

#[async_trait]
impl QueueWorker for Notifier {
    type Item = Notification;

    fn work_queue(&self) -> MsgQueue<Work<Notification>> {
        self.input.clone()
    }

    async fn main_func(&mut self, note: Notification, ctx: &WorkerCtx) -> Result<(), WorkerError> {
        if self.is_suppressed(&note) {
            self.suppressed += 1;
            info!(kind = %note.kind, "notification suppressed");
            return Ok(());
        }
        let mailer: &dyn Mailer = &*self.mailer;
        let (msg, to) = (&note, self.cfg.email.as_str());
        let res = self
            .retry
            .run("notify", &ctx.shutdown, move |_| mailer.deliver(msg, to))
            .await;
        match res {
            Ok(()) => {
                info!(kind = %note.kind, to, "notification delivered");
                self.sent += 1;
                self.last = Some(note);
            }
            Err(RetryError::Cancelled) => {}
            Err(err) => {
                warn!(kind = %note.kind, label = err.as_label(), error = %err, "notification dropped");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Worker for Notifier {
    async fn main_loop(&mut self, ctx: &WorkerCtx) -> Result<(), WorkerError> {
        queue_loop(self, ctx).await
    }

    async fn shutdown(&mut self, _ctx: &WorkerCtx) -> Result<(), WorkerError> {
        info!(sent = self.sent, suppressed = self.suppressed, "notifier stopping");
        Ok(())
    }
}
