//! # Event bus carrying messages from every worker to the runner.
//!
//! [`Bus`] is a thin wrapper around a bounded [`MsgQueue`] of [`EventMessage`]s.
//! Unlike a broadcast channel there is exactly one consumer (the runner), and a
//! secondary context shares the bus of its parent, so events always bubble up to
//! one place.
//!
//! ## Architecture
//! ```text
//! Publishers (many):                     Consumer (one):
//!   COLLECT ──┐
//!   DETECT  ──┼──────► Bus ───────► Runner::tick ──► dispatch(EventMessage)
//!   UPLOAD  ──┤  (bounded queue)
//!   SENTINEL ─┘
//! ```
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` never waits; a full bus drops the message with a warning.
//! - **Bounded consume**: `next(timeout)` returns `None` when nothing arrived in time.
//! - **Draining**: `drain()` yields every pending message once; used on mode switches.

use std::time::Duration;

use tracing::warn;

use super::event::EventMessage;
use crate::queue::{MsgQueue, PutError};

/// Single-consumer event queue shared across a context tree.
#[derive(Clone, Debug)]
pub struct Bus {
    queue: MsgQueue<EventMessage>,
}

impl Bus {
    /// Creates a new bus holding at most `capacity` pending messages (min 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: MsgQueue::new(capacity),
        }
    }

    /// Enqueues a message without waiting.
    ///
    /// Returns `false` if the message was dropped because the bus is full or closed.
    pub fn publish(&self, ev: EventMessage) -> bool {
        match self.queue.try_put_now(ev) {
            Ok(()) => true,
            Err(err) => {
                let label = err.as_label();
                let ev = err.into_inner();
                warn!(kind = %ev.kind, source = %ev.source, reason = label, "event dropped");
                false
            }
        }
    }

    /// Enqueues a message, waiting up to `timeout` for room.
    pub async fn publish_wait(&self, ev: EventMessage, timeout: Duration) -> bool {
        match self.queue.try_put(ev, timeout).await {
            Ok(()) => true,
            Err(PutError::Full(ev)) | Err(PutError::Closed(ev)) => {
                warn!(kind = %ev.kind, source = %ev.source, "event dropped after wait");
                false
            }
        }
    }

    /// Pops the next message, waiting up to `timeout`.
    pub async fn next(&self, timeout: Duration) -> Option<EventMessage> {
        self.queue.try_get(timeout).await
    }

    /// Waits until a message is pending without consuming it.
    pub async fn wait_ready(&self, timeout: Duration) -> bool {
        self.queue.wait_ready(timeout).await
    }

    /// Removes every pending message.
    pub fn drain(&self) -> impl Iterator<Item = EventMessage> + '_ {
        self.queue.drain()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn close(&self) {
        self.queue.close()
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    /// Underlying queue, for registration in a context.
    pub(crate) fn queue(&self) -> &MsgQueue<EventMessage> {
        &self.queue
    }
}
