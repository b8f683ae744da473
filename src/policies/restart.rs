//! # Restart backoff for dead brokers.
//!
//! A broker dies on any error it cannot reason about (lost connection, failed
//! disposition, launch failure). [`RestartBackoff`] spaces out its restarts:
//! the delay for attempt `n` is `first × factor^n`, clamped to `max`, then jittered.
//! The base is derived from the attempt number alone, so jitter never feeds back into
//! later delays.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use stalkvisor::{JitterPolicy, RestartBackoff};
//!
//! let backoff = RestartBackoff {
//!     first: Duration::from_millis(100),
//!     max: Duration::from_secs(10),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//!
//! assert_eq!(backoff.next(0), Duration::from_millis(100));
//! assert_eq!(backoff.next(1), Duration::from_millis(200));
//! // 100ms × 2^10 = 102.4s → capped at max
//! assert_eq!(backoff.next(10), Duration::from_secs(10));
//! ```

use std::time::Duration;

use super::jitter::JitterPolicy;

/// Exponential restart backoff.
#[derive(Clone, Copy, Debug)]
pub struct RestartBackoff {
    /// Delay before the first restart.
    pub first: Duration,
    /// Upper bound of any delay.
    pub max: Duration,
    /// Multiplicative growth factor (`>= 1.0` recommended).
    pub factor: f64,
    /// Randomization applied to the clamped delay.
    pub jitter: JitterPolicy,
}

impl Default for RestartBackoff {
    /// Returns `first = 1s`, `factor = 2.0`, `max = 60s`, `jitter = Equal`.
    fn default() -> Self {
        Self {
            first: Duration::from_secs(1),
            max: Duration::from_secs(60),
            factor: 2.0,
            jitter: JitterPolicy::Equal,
        }
    }
}

impl RestartBackoff {
    /// Delay before restart number `attempt` (0-indexed).
    pub fn next(&self, attempt: u32) -> Duration {
        let max_secs = self.max.as_secs_f64();
        let exp = attempt.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);

        let base = if !secs.is_finite() || secs < 0.0 || secs > max_secs {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        };
        self.jitter.apply(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(first_ms: u64, max_secs: u64, factor: f64) -> RestartBackoff {
        RestartBackoff {
            first: Duration::from_millis(first_ms),
            max: Duration::from_secs(max_secs),
            factor,
            jitter: JitterPolicy::None,
        }
    }

    #[test]
    fn grows_exponentially() {
        let policy = plain(100, 30, 2.0);
        assert_eq!(policy.next(0), Duration::from_millis(100));
        assert_eq!(policy.next(1), Duration::from_millis(200));
        assert_eq!(policy.next(2), Duration::from_millis(400));
        assert_eq!(policy.next(4), Duration::from_millis(1600));
    }

    #[test]
    fn first_above_max_is_clamped() {
        let policy = RestartBackoff {
            first: Duration::from_secs(10),
            ..plain(0, 5, 2.0)
        };
        assert_eq!(policy.next(0), Duration::from_secs(5));
    }

    #[test]
    fn overflow_clamps_to_max() {
        let policy = plain(100, 10, 2.0);
        assert_eq!(policy.next(100), Duration::from_secs(10));
        assert_eq!(policy.next(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn equal_jitter_stays_in_upper_half() {
        let policy = RestartBackoff {
            jitter: JitterPolicy::Equal,
            ..plain(100, 30, 2.0)
        };
        for attempt in 0..15 {
            let base_ms = (100.0 * 2.0f64.powi(attempt as i32)).min(30_000.0);
            let delay = policy.next(attempt);
            assert!(
                delay >= Duration::from_millis((base_ms / 2.0) as u64),
                "attempt {}: delay {:?} below half of {}ms",
                attempt,
                delay,
                base_ms
            );
            assert!(delay <= Duration::from_millis(base_ms as u64));
        }
    }
}
