//! Wall clock and daily operating schedule.
//!
//! ```text
//! 00:00 ──── start_hour ════════ Active ════════ end_hour ──── 24:00
//!   Passive                                         Passive
//! ```
//!
//! When `start_hour > end_hour` the active window wraps midnight. When they are equal
//! the schedule is always active and never transitions.

use std::time::Duration;

use chrono::{Local, NaiveDateTime};

use super::Mode;
use crate::config::Config;

pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Local wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Maps a point in time to the mode the device should be in.
pub trait Schedule: Send + Sync {
    fn expected_mode(&self, now: NaiveDateTime) -> Mode;

    /// Next instant after `now` at which `expected_mode` changes, if any.
    fn next_transition(&self, now: NaiveDateTime) -> Option<NaiveDateTime>;
}

/// Active between `start_hour` and `end_hour` (local time), passive otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailySchedule {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl DailySchedule {
    pub fn new(start_hour: u32, end_hour: u32) -> Self {
        Self {
            start_hour: start_hour.min(23),
            end_hour: end_hour.min(23),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.advanced.start_hour, cfg.advanced.end_hour)
    }

    fn is_active_hour(&self, hour: u32) -> bool {
        use std::cmp::Ordering::*;
        match self.start_hour.cmp(&self.end_hour) {
            Less => (self.start_hour..self.end_hour).contains(&hour),
            Greater => hour >= self.start_hour || hour < self.end_hour,
            Equal => true,
        }
    }
}

impl Schedule for DailySchedule {
    fn expected_mode(&self, now: NaiveDateTime) -> Mode {
        use chrono::Timelike;
        if self.is_active_hour(now.hour()) {
            Mode::Active
        } else {
            Mode::Passive
        }
    }

    fn next_transition(&self, now: NaiveDateTime) -> Option<NaiveDateTime> {
        if self.start_hour == self.end_hour {
            return None;
        }
        let today = now.date();
        let tomorrow = today.succ_opt()?;
        [today, tomorrow]
            .into_iter()
            .flat_map(|day| {
                [self.start_hour, self.end_hour].map(|hour| day.and_hms_opt(hour, 0, 0))
            })
            .flatten()
            .filter(|t| *t > now)
            .min()
    }
}

/// Time from `now` until `then`, zero if `then` has passed.
pub fn until(now: NaiveDateTime, then: NaiveDateTime) -> Duration {
    (then - now).to_std().unwrap_or(Duration::ZERO)
}
