//! # Terminal actions on a reservation.

use std::fmt;
use std::time::Duration;

/// The one action that ends a reservation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Job done; remove it.
    Delete,
    /// Put it back, reservable again after `delay`.
    Release {
        /// Delay before the job is ready again.
        delay: Duration,
    },
    /// Park it for an operator.
    Bury,
}

impl Disposition {
    /// Short stable label: `"delete"`, `"release"` or `"bury"`.
    pub fn as_label(&self) -> &'static str {
        match self {
            Disposition::Delete => "delete",
            Disposition::Release { .. } => "release",
            Disposition::Bury => "bury",
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disposition::Release { delay } => write!(f, "release(delay={delay:?})"),
            other => f.write_str(other.as_label()),
        }
    }
}
