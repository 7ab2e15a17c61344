//! # Event messages flowing from workers up to the runner.
//!
//! The [`EventKind`] enum classifies messages into three groups:
//! - **Payload events**: `NOTIFY` (carries a [`Notification`] for the operator)
//! - **Escalation / shutdown**: `FATAL`, `HARD_SHUTDOWN`, `SOFT_SHUTDOWN`
//! - **Mode changes**: `ENTER_ACTIVE_MODE`, `ENTER_PASSIVE_MODE`, `ENTER_END_MODE`
//!
//! Every kind has a stable wire name. The same names are used for operator override
//! files in the sentinel directory.
//!
//! ## Ordering guarantees
//! Each message has a process-wide sequence number (`seq`) that increases monotonically.
//! Ordering across producers is not guaranteed on the bus, only FIFO per queue.
//!
//! ## Example
//! ```rust
//! use fishvisor::{EventKind, EventMessage};
//!
//! let ev = EventMessage::new(EventKind::HardShutdown)
//!     .with_source("SENTINEL")
//!     .with_text("operator override");
//!
//! assert_eq!(ev.kind, EventKind::HardShutdown);
//! assert_eq!(&*ev.source, "SENTINEL");
//! assert_eq!(ev.kind.as_str(), "HARD_SHUTDOWN");
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::SystemTime;

use super::notification::Notification;

/// Global sequence counter for message ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of bus messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Operator notification; forwarded to the notifier.
    Notify,
    /// Unrecoverable error; triggers final notification, reboot request and hard shutdown.
    Fatal,
    /// Terminal stop of the whole context tree.
    HardShutdown,
    /// Stop of the current mode's workers only.
    SoftShutdown,
    EnterActiveMode,
    EnterPassiveMode,
    EnterEndMode,
    /// Diagnostic traffic; logged and ignored.
    Debug,
}

impl EventKind {
    pub const ALL: [EventKind; 8] = [
        EventKind::Notify,
        EventKind::Fatal,
        EventKind::HardShutdown,
        EventKind::SoftShutdown,
        EventKind::EnterActiveMode,
        EventKind::EnterPassiveMode,
        EventKind::EnterEndMode,
        EventKind::Debug,
    ];

    /// Stable wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Notify => "NOTIFY",
            EventKind::Fatal => "FATAL",
            EventKind::HardShutdown => "HARD_SHUTDOWN",
            EventKind::SoftShutdown => "SOFT_SHUTDOWN",
            EventKind::EnterActiveMode => "ENTER_ACTIVE_MODE",
            EventKind::EnterPassiveMode => "ENTER_PASSIVE_MODE",
            EventKind::EnterEndMode => "ENTER_END_MODE",
            EventKind::Debug => "DEBUG",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string is not a known event name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEventKind(pub String);

impl fmt::Display for UnknownEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown event kind: {}", self.0)
    }
}

impl std::error::Error for UnknownEventKind {}

impl FromStr for EventKind {
    type Err = UnknownEventKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| UnknownEventKind(s.to_string()))
    }
}

/// Opaque message body.
#[derive(Debug, Clone, Default)]
pub enum Payload {
    #[default]
    Empty,
    Text(Arc<str>),
    Notification(Notification),
}

/// Bus message with metadata.
///
/// - `seq`: unique, monotonically increasing sequence number
/// - `at`: wall-clock timestamp
/// - `source`: name of the emitting worker
#[derive(Debug, Clone)]
pub struct EventMessage {
    pub seq: u64,
    pub at: SystemTime,
    pub source: Arc<str>,
    pub kind: EventKind,
    pub payload: Payload,
}

impl EventMessage {
    /// Creates a new message of the given kind with the current timestamp and the next `seq`.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            source: Arc::from("main"),
            kind,
            payload: Payload::Empty,
        }
    }

    #[inline]
    pub fn with_source(mut self, source: impl Into<Arc<str>>) -> Self {
        self.source = source.into();
        self
    }

    #[inline]
    pub fn with_text(mut self, text: impl Into<Arc<str>>) -> Self {
        self.payload = Payload::Text(text.into());
        self
    }

    #[inline]
    pub fn with_notification(mut self, n: Notification) -> Self {
        self.payload = Payload::Notification(n);
        self
    }

    /// Text payload, if any.
    pub fn text(&self) -> Option<&str> {
        match &self.payload {
            Payload::Text(t) => Some(t),
            _ => None,
        }
    }

    pub fn notification(&self) -> Option<&Notification> {
        match &self.payload {
            Payload::Notification(n) => Some(n),
            _ => None,
        }
    }

    /// True for mode-change requests.
    pub fn is_mode_change(&self) -> bool {
        matches!(
            self.kind,
            EventKind::EnterActiveMode | EventKind::EnterPassiveMode | EventKind::EnterEndMode
        )
    }
}
