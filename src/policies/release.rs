//! # Release backoff for failed jobs.
//!
//! [`ReleaseBackoff`] turns the server's release count into the delay of the next
//! release: `unit × releases^exponent`. The count is read from the server right before
//! releasing, so it is the number of releases *before* this one.
//!
//! With the defaults (`unit = 1s`, `exponent = 4`) and a bury threshold of 10 the
//! sequence is 0s, 1s, 16s, 81s, 256s, … 6561s (≈1h49m) for the ninth release,
//! about 4h15m of accumulated waiting across the whole retry budget.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use stalkvisor::ReleaseBackoff;
//!
//! let backoff = ReleaseBackoff::default();
//! assert_eq!(backoff.delay(0), Duration::ZERO);
//! assert_eq!(backoff.delay(2), Duration::from_secs(16));
//! assert_eq!(backoff.delay(3), Duration::from_secs(81));
//! ```

use std::time::Duration;

/// Polynomial release backoff.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReleaseBackoff {
    /// Delay for a release count of one.
    pub unit: Duration,
    /// Power applied to the release count.
    pub exponent: u32,
}

impl Default for ReleaseBackoff {
    /// Returns `unit = 1s`, `exponent = 4`.
    fn default() -> Self {
        Self {
            unit: Duration::from_secs(1),
            exponent: 4,
        }
    }
}

impl ReleaseBackoff {
    /// Delay for a job that has already been released `releases` times.
    ///
    /// Saturates at `Duration::MAX` instead of overflowing.
    pub fn delay(&self, releases: u64) -> Duration {
        let factor = releases.saturating_pow(self.exponent);
        let factor = u32::try_from(factor).unwrap_or(u32::MAX);
        self.unit.saturating_mul(factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_fourth_power_seconds() {
        let backoff = ReleaseBackoff::default();
        let secs: Vec<u64> = (0..10).map(|r| backoff.delay(r).as_secs()).collect();
        assert_eq!(secs, vec![0, 1, 16, 81, 256, 625, 1296, 2401, 4096, 6561]);
    }

    #[test]
    fn strictly_increasing_below_threshold() {
        let backoff = ReleaseBackoff::default();
        for r in 1..10 {
            assert!(
                backoff.delay(r) > backoff.delay(r - 1),
                "release {} should wait longer than release {}",
                r,
                r - 1
            );
        }
    }

    #[test]
    fn cumulative_budget_is_about_four_hours() {
        let backoff = ReleaseBackoff::default();
        let total: Duration = (0..10).map(|r| backoff.delay(r)).sum();
        assert_eq!(total, Duration::from_secs(15_333));
    }

    #[test]
    fn huge_counts_saturate() {
        let backoff = ReleaseBackoff::default();
        assert_eq!(
            backoff.delay(u64::MAX),
            Duration::from_secs(1).saturating_mul(u32::MAX)
        );
    }

    #[test]
    fn custom_unit_and_exponent() {
        let backoff = ReleaseBackoff {
            unit: Duration::from_millis(500),
            exponent: 2,
        };
        assert_eq!(backoff.delay(3), Duration::from_millis(4500));
    }
}
