//! Bus messages: types and the single-consumer bus.
//!
//! This module groups the event **data model** and the **bus** that carries
//! messages from every worker up to the runner.
//!
//! ## Contents
//! - [`EventKind`], [`EventMessage`], [`Payload`] classification and payload
//! - [`Notification`] operator-facing message carried by `NOTIFY`
//! - [`Bus`] bounded queue shared by a context and all of its secondaries
//!
//! ## Quick reference
//! - **Publishers**: every worker through `WorkerCtx::emit`, the runner itself
//!   (self-injected mode changes, deadlines, sentinel overrides, signals).
//! - **Consumer**: `Runner::tick` only.

mod bus;
mod event;
mod notification;

pub use bus::Bus;
pub use event::{EventKind, EventMessage, Payload, UnknownEventKind};
pub use notification::Notification;
