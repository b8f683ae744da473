//! # Retry budget of a job.
//!
//! [`BuryPolicy`] holds the two thresholds checked right after a job is reserved. The
//! counters come from the server (`timeouts`, `releases`), never from local memory, so
//! the budget survives broker restarts and is shared by every broker on the tube.

use std::fmt;

use crate::job::JobStats;

/// Thresholds at which a job is buried instead of executed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BuryPolicy {
    /// Bury once `timeouts >= timeouts_threshold`.
    pub timeouts: u64,
    /// Bury once `releases >= releases_threshold`.
    pub releases: u64,
}

impl Default for BuryPolicy {
    /// One timeout or ten releases.
    fn default() -> Self {
        Self {
            timeouts: 1,
            releases: 10,
        }
    }
}

/// Why a job was buried unexecuted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuryReason {
    /// Too many reservations reached their TTR.
    Timeouts {
        /// Server-reported count.
        count: u64,
        /// Configured threshold.
        threshold: u64,
    },
    /// Too many releases.
    Releases {
        /// Server-reported count.
        count: u64,
        /// Configured threshold.
        threshold: u64,
    },
}

impl BuryPolicy {
    /// Returns the reason to bury, or `None` if the job may run.
    ///
    /// Timeouts are checked first.
    pub fn check(&self, stats: &JobStats) -> Option<BuryReason> {
        if stats.timeouts >= self.timeouts {
            return Some(BuryReason::Timeouts {
                count: stats.timeouts,
                threshold: self.timeouts,
            });
        }
        if stats.releases >= self.releases {
            return Some(BuryReason::Releases {
                count: stats.releases,
                threshold: self.releases,
            });
        }
        None
    }
}

impl fmt::Display for BuryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuryReason::Timeouts { count, threshold } => {
                write!(f, "timeouts {count} >= {threshold}")
            }
            BuryReason::Releases { count, threshold } => {
                write!(f, "releases {count} >= {threshold}")
            }
        }
    }
}
