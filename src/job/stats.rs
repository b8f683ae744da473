//! # Per-job statistics, as reported by the queue server.
//!
//! [`JobStats`] is a typed view over the raw `stats-job` mapping. It is never cached:
//! every decision point in the broker fetches a fresh one, because the server's counters
//! may move between two queries.

use std::{collections::HashMap, str::FromStr, time::Duration};

use crate::error::QueueError;

/// Typed subset of `stats-job`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JobStats {
    /// Priority; zero is most urgent.
    pub priority: u32,
    /// Remaining time-to-run. The server reports whole seconds, rounded down.
    pub time_left: Duration,
    /// How many times a reservation of this job reached its TTR.
    pub timeouts: u64,
    /// How many times the job was released.
    pub releases: u64,
}

impl JobStats {
    /// Builds the typed view from a raw stats mapping.
    ///
    /// # Example
    /// ```
    /// use std::{collections::HashMap, time::Duration};
    /// use stalkvisor::JobStats;
    ///
    /// let raw: HashMap<String, String> = [("pri", "10"), ("time-left", "59"), ("timeouts", "0"), ("releases", "3")]
    ///     .into_iter()
    ///     .map(|(k, v)| (k.to_string(), v.to_string()))
    ///     .collect();
    /// let stats = JobStats::from_map(&raw).unwrap();
    /// assert_eq!(stats.time_left, Duration::from_secs(59));
    /// assert_eq!(stats.releases, 3);
    /// ```
    pub fn from_map(raw: &HashMap<String, String>) -> Result<Self, QueueError> {
        Ok(Self {
            priority: field(raw, "pri")?,
            time_left: Duration::from_secs(field(raw, "time-left")?),
            timeouts: field(raw, "timeouts")?,
            releases: field(raw, "releases")?,
        })
    }
}

fn field<T>(raw: &HashMap<String, String>, key: &'static str) -> Result<T, QueueError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let value = raw.get(key).ok_or_else(|| QueueError::BadStat {
        key,
        reason: "missing".to_string(),
    })?;
    value.parse::<T>().map_err(|e| QueueError::BadStat {
        key,
        reason: format!("{value:?}: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn missing_field_is_reported_by_key() {
        let err = JobStats::from_map(&raw(&[("pri", "1"), ("time-left", "3")])).unwrap_err();
        assert!(matches!(err, QueueError::BadStat { key: "timeouts", .. }));
    }

    #[test]
    fn unparseable_field_is_rejected() {
        let err = JobStats::from_map(&raw(&[
            ("pri", "-1"),
            ("time-left", "3"),
            ("timeouts", "0"),
            ("releases", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, QueueError::BadStat { key: "pri", .. }));
    }
}
