//! # Exponential backoff.
//!
//! [`BackoffPolicy`] maps a 0-based attempt number to a delay:
//! `first × factor^attempt`, capped at `max`, then jittered. The base is derived only
//! from the attempt number, so jitter never feeds back into later delays.
//!
//! Used for transient collaborator retries (upload, convert, mail) and for the
//! collector's congestion slowdown.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use fishvisor::{BackoffPolicy, JitterPolicy};
//!
//! let slowdown = BackoffPolicy::capped_multiple(Duration::from_millis(500), 2.0, 8);
//! assert_eq!(slowdown.delay(0), Duration::from_millis(500));
//! assert_eq!(slowdown.delay(2), Duration::from_secs(2));
//! assert_eq!(slowdown.delay(10), Duration::from_secs(4));
//! assert_eq!(slowdown.jitter, JitterPolicy::None);
//! ```

use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

/// Delay growth between attempts.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay for attempt 0.
    pub first: Duration,
    /// Upper bound for any delay.
    pub max: Duration,
    /// Growth per attempt.
    pub factor: f64,
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// `first = 1s`, `factor = 2.0`, `max = 30s`, no jitter.
    fn default() -> Self {
        Self {
            first: Duration::from_secs(1),
            max: Duration::from_secs(30),
            factor: 2.0,
            jitter: JitterPolicy::None,
        }
    }
}

impl BackoffPolicy {
    /// Policy starting at `base` and never exceeding `base × cap_multiple`.
    pub fn capped_multiple(base: Duration, factor: f64, cap_multiple: u32) -> Self {
        Self {
            first: base,
            max: base.saturating_mul(cap_multiple.max(1)),
            factor,
            jitter: JitterPolicy::None,
        }
    }

    pub fn with_jitter(mut self, jitter: JitterPolicy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before attempt `attempt + 1`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);
        let base = if secs.is_finite() && secs >= 0.0 && secs <= self.max.as_secs_f64() {
            Duration::from_secs_f64(secs)
        } else {
            self.max
        };
        self.jitter.apply(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(factor: f64) -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_millis(100),
            max: Duration::from_secs(1),
            factor,
            jitter: JitterPolicy::None,
        }
    }

    #[test]
    fn test_growth_then_cap() {
        let p = policy(2.0);
        assert_eq!(p.delay(0), Duration::from_millis(100));
        assert_eq!(p.delay(3), Duration::from_millis(800));
        assert_eq!(p.delay(4), Duration::from_secs(1));
        assert_eq!(p.delay(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn test_constant_factor() {
        let p = policy(1.0);
        assert!((0..5).all(|a| p.delay(a) == Duration::from_millis(100)));
    }

    #[test]
    fn test_first_above_max_is_capped() {
        let p = BackoffPolicy {
            first: Duration::from_secs(5),
            ..policy(2.0)
        };
        assert_eq!(p.delay(0), Duration::from_secs(1));
    }

    #[test]
    fn test_equal_jitter_stays_in_upper_half() {
        let p = policy(2.0).with_jitter(JitterPolicy::Equal);
        for attempt in 0..6 {
            let d = p.delay(attempt);
            let base = policy(2.0).delay(attempt);
            assert!(d >= base / 2 && d <= base, "attempt {attempt}: {d:?} vs {base:?}");
        }
    }
}
