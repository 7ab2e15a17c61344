//! # Supervision timing configuration.
//!
//! Provides [`SupervisionConfig`], the timing knobs shared by every supervisor,
//! context and worker loop.
//!
//! It is used in three places:
//! 1. **Supervisor**: `startup_wait` bounds the startup acknowledgement, `max_tries` bounds `terminate()`
//! 2. **Context**: `shutdown_wait` is the grace window of `stop_all()`
//! 3. **Worker loops**: `poll_timeout` bounds every queue read, `timer_slice` bounds every timer sleep
//!
//! ## Sentinel values
//! - `max_tries = 0` → treated as 1 (at least one attempt)
//! - `bus_capacity = 0` → clamped to 1

use std::time::Duration;

/// Timing configuration for the supervision layer.
///
/// ## Field semantics
/// - `startup_wait`: how long `Supervisor::spawn` waits for the startup acknowledgement
/// - `shutdown_wait`: grace window for cooperative stop before forced termination
/// - `max_tries`: attempts for terminate/soft-shutdown/retries
/// - `poll_timeout`: bound on every blocking-looking queue operation
/// - `timer_slice`: longest single sleep of a timer-driven worker
/// - `bus_capacity`: capacity of the event bus created by a primary context
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SupervisionConfig {
    pub startup_wait: Duration,
    pub shutdown_wait: Duration,
    pub max_tries: u32,
    pub poll_timeout: Duration,
    pub timer_slice: Duration,
    pub bus_capacity: usize,
}

impl SupervisionConfig {
    /// Number of attempts, never below 1.
    #[inline]
    pub fn tries(&self) -> u32 {
        self.max_tries.max(1)
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    pub fn with_startup_wait(mut self, d: Duration) -> Self {
        self.startup_wait = d;
        self
    }

    pub fn with_shutdown_wait(mut self, d: Duration) -> Self {
        self.shutdown_wait = d;
        self
    }

    pub fn with_max_tries(mut self, n: u32) -> Self {
        self.max_tries = n;
        self
    }

    pub fn with_poll_timeout(mut self, d: Duration) -> Self {
        self.poll_timeout = d;
        self
    }
}

impl Default for SupervisionConfig {
    /// Default configuration:
    ///
    /// - `startup_wait = 10s`
    /// - `shutdown_wait = 10s`
    /// - `max_tries = 3`
    /// - `poll_timeout = 100ms`
    /// - `timer_slice = 20ms`
    /// - `bus_capacity = 1024`
    fn default() -> Self {
        Self {
            startup_wait: Duration::from_secs(10),
            shutdown_wait: Duration::from_secs(10),
            max_tries: 3,
            poll_timeout: Duration::from_millis(100),
            timer_slice: Duration::from_millis(20),
            bus_capacity: 1024,
        }
    }
}
