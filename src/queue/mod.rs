//! # Bounded message queue shared between workers.
//!
//! [`MsgQueue`] is a bounded FIFO used for both data transfer (frames, files to upload,
//! notifications) and control signaling (the event bus). Every operation is bounded:
//! nothing blocks longer than the timeout it was given, which is what lets every worker
//! re-check its shutdown token between queue operations.
//!
//! ## Architecture
//! ```text
//! producer(s) ── try_put(item, t) ──► [ VecDeque (cap N) ] ── try_get(t) ──► consumer(s)
//!                  │                        │   ▲                  │
//!                  └─ wait on not_full ◄────┘   └──── not_empty ───┘
//! ```
//!
//! ## Rules
//! - `try_put` on a full queue waits at most `t`, then hands the item back.
//! - `try_get` on an empty queue waits at most `t`, then yields `None`.
//! - `drain()` is lazy, destructive and finite; it stops at the first empty observation.
//! - `close()` is idempotent: remaining items are discarded and all waiters wake up.
//! - Capacity is clamped to a minimum of 1.

mod work;

pub use work::Work;

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{self, Instant};

/// Why an item could not be enqueued. The item is always handed back.
pub enum PutError<T> {
    /// Queue stayed full for the whole timeout.
    Full(T),
    /// Queue was closed.
    Closed(T),
}

impl<T> PutError<T> {
    /// Recovers the rejected item.
    pub fn into_inner(self) -> T {
        match self {
            PutError::Full(item) | PutError::Closed(item) => item,
        }
    }

    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            PutError::Full(_) => "queue_full",
            PutError::Closed(_) => "queue_closed",
        }
    }
}

impl<T> fmt::Debug for PutError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

struct State<T> {
    items: VecDeque<T>,
    closed: bool,
}

struct Inner<T> {
    state: Mutex<State<T>>,
    capacity: usize,
    not_empty: Notify,
    not_full: Notify,
}

impl<T> Inner<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Bounded, cloneable, multi-producer multi-consumer FIFO.
///
/// Clones share the same underlying buffer.
pub struct MsgQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for MsgQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for MsgQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.inner.lock();
        f.debug_struct("MsgQueue")
            .field("len", &st.items.len())
            .field("capacity", &self.inner.capacity)
            .field("closed", &st.closed)
            .finish()
    }
}

impl<T> MsgQueue<T> {
    /// Creates an empty queue holding at most `capacity` items (min 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    items: VecDeque::with_capacity(capacity.min(1024)),
                    closed: false,
                }),
                capacity,
                not_empty: Notify::new(),
                not_full: Notify::new(),
            }),
        }
    }

    /// Maximum number of buffered items.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Current number of buffered items.
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Enqueues without waiting.
    pub fn try_put_now(&self, item: T) -> Result<(), PutError<T>> {
        {
            let mut st = self.inner.lock();
            if st.closed {
                return Err(PutError::Closed(item));
            }
            if st.items.len() >= self.inner.capacity {
                return Err(PutError::Full(item));
            }
            st.items.push_back(item);
        }
        self.inner.not_empty.notify_one();
        Ok(())
    }

    /// Enqueues, waiting up to `timeout` for room.
    pub async fn try_put(&self, item: T, timeout: Duration) -> Result<(), PutError<T>> {
        let deadline = Instant::now() + timeout;
        let mut item = item;
        loop {
            let notified = self.inner.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_put_now(item) {
                Ok(()) => return Ok(()),
                Err(PutError::Closed(back)) => return Err(PutError::Closed(back)),
                Err(PutError::Full(back)) => item = back,
            }
            if time::timeout_at(deadline, notified).await.is_err() {
                return self.try_put_now(item);
            }
        }
    }

    /// Dequeues without waiting.
    pub fn try_get_now(&self) -> Option<T> {
        let item = self.inner.lock().items.pop_front();
        if item.is_some() {
            self.inner.not_full.notify_one();
        }
        item
    }

    /// Dequeues, waiting up to `timeout` for an item.
    ///
    /// Returns `None` on timeout or when the queue is closed.
    pub async fn try_get(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.inner.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut st = self.inner.lock();
                if let Some(item) = st.items.pop_front() {
                    drop(st);
                    self.inner.not_full.notify_one();
                    return Some(item);
                }
                if st.closed {
                    return None;
                }
            }
            if time::timeout_at(deadline, notified).await.is_err() {
                return self.try_get_now();
            }
        }
    }

    /// Waits up to `timeout` until at least one item is buffered, without taking it.
    pub async fn wait_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.inner.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let st = self.inner.lock();
                if !st.items.is_empty() {
                    return true;
                }
                if st.closed {
                    return false;
                }
            }
            if time::timeout_at(deadline, notified).await.is_err() {
                return !self.is_empty();
            }
        }
    }

    /// Lazily removes every item currently buffered.
    ///
    /// The iterator ends at the first empty observation, so a second `drain` right after
    /// the first yields nothing.
    pub fn drain(&self) -> impl Iterator<Item = T> + '_ {
        std::iter::from_fn(move || self.try_get_now())
    }

    /// Closes the queue and discards anything left. Idempotent.
    pub fn close(&self) {
        {
            let mut st = self.inner.lock();
            st.closed = true;
            st.items.clear();
        }
        self.inner.not_empty.notify_waiters();
        self.inner.not_full.notify_waiters();
    }
}

/// Type-erased view of a queue, used by a Context to drain and close
/// queues of different item types in bulk.
pub trait QueueHandle: Send + Sync {
    /// Drains the queue and returns how many items were discarded.
    fn drain_count(&self) -> usize;
    fn close(&self);
    fn is_closed(&self) -> bool;
}

impl<T: Send + 'static> QueueHandle for MsgQueue<T> {
    fn drain_count(&self) -> usize {
        self.drain().count()
    }

    fn close(&self) {
        MsgQueue::close(self)
    }

    fn is_closed(&self) -> bool {
        MsgQueue::is_closed(self)
    }
}
