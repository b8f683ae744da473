//! # Broker and dispatcher configuration.
//!
//! - [`BrokerConfig`] everything one broker needs to run jobs: the command, the retry
//!   budget, deadline handling and reservation timing.
//! - [`DispatcherConfig`] how many brokers run, how tubes are discovered, how long
//!   shutdown may take.
//!
//! ## Sentinel values
//! - `kill_grace = None` → never escalate to SIGKILL (terminate requests only)
//! - `bury_exit_code = None` → every non-zero exit is released with backoff
//! - `per_tube = 0` → treated as 1

use std::time::Duration;

use crate::policies::{BuryPolicy, ReleaseBackoff, RestartBackoff};
use crate::process::ShellCommand;

/// Lower bound for the re-terminate period, so a zero interval cannot spin.
const MIN_TERMINATE_INTERVAL: Duration = Duration::from_millis(10);

/// Configuration of one broker (one execution engine).
///
/// ## Field semantics
/// - `ttr_margin` is added to the server-reported `time-left` to form the deadline; it
///   compensates for the server's whole-second precision.
/// - `timeout_bury_threshold` / `release_bury_threshold`: a job whose counters reach
///   either is buried unexecuted.
/// - `terminate_interval`: after the deadline, SIGTERM is re-sent this often until
///   the command exits.
/// - `kill_grace`: time between the first SIGTERM and the single SIGKILL.
#[derive(Clone, Debug)]
pub struct BrokerConfig {
    /// Interpreter invoked as `<shell> -c <command>`.
    pub shell: String,
    /// Command line run for every job.
    pub command: String,
    /// Added to `time-left` to form the deadline.
    pub ttr_margin: Duration,
    /// Bury when `timeouts >= timeout_bury_threshold`.
    pub timeout_bury_threshold: u64,
    /// Bury when `releases >= release_bury_threshold`.
    pub release_bury_threshold: u64,
    /// Release delay as a function of the release count.
    pub release_backoff: ReleaseBackoff,
    /// Exit code that buries the job instead of releasing it.
    pub bury_exit_code: Option<i32>,
    /// Timeout of one reserve request.
    pub reserve_timeout: Duration,
    /// Pause after a DEADLINE_SOON answer.
    pub deadline_soon_delay: Duration,
    /// Re-send period of SIGTERM after the deadline.
    pub terminate_interval: Duration,
    /// Delay from first SIGTERM to SIGKILL (`None` = never kill).
    pub kill_grace: Option<Duration>,
}

impl BrokerConfig {
    /// Default configuration running `command`.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    /// The retry budget as a [`BuryPolicy`].
    #[inline]
    pub fn bury_policy(&self) -> BuryPolicy {
        BuryPolicy {
            timeouts: self.timeout_bury_threshold,
            releases: self.release_bury_threshold,
        }
    }

    /// The worker command.
    #[inline]
    pub fn shell_command(&self) -> ShellCommand {
        ShellCommand::new(self.shell.clone(), self.command.clone())
    }

    /// `terminate_interval`, never below 10ms.
    #[inline]
    pub fn terminate_interval_clamped(&self) -> Duration {
        self.terminate_interval.max(MIN_TERMINATE_INTERVAL)
    }

    /// Checks the fields that have no usable default; returns every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut msgs = Vec::new();
        if self.command.trim().is_empty() {
            msgs.push("Command must not be empty.".to_string());
        }
        if self.shell.trim().is_empty() {
            msgs.push("Shell must not be empty.".to_string());
        }
        if msgs.is_empty() { Ok(()) } else { Err(msgs) }
    }
}

impl Default for BrokerConfig {
    /// - `shell = /bin/sh`, `command = ""`
    /// - `ttr_margin = 1s`
    /// - `timeout_bury_threshold = 1`, `release_bury_threshold = 10`
    /// - `release_backoff = releases^4 seconds`, `bury_exit_code = None`
    /// - `reserve_timeout = 1h`, `deadline_soon_delay = 1s`
    /// - `terminate_interval = 1s`, `kill_grace = 5s`
    fn default() -> Self {
        let budget = BuryPolicy::default();
        Self {
            shell: "/bin/sh".to_string(),
            command: String::new(),
            ttr_margin: Duration::from_secs(1),
            timeout_bury_threshold: budget.timeouts,
            release_bury_threshold: budget.releases,
            release_backoff: ReleaseBackoff::default(),
            bury_exit_code: None,
            reserve_timeout: Duration::from_secs(60 * 60),
            deadline_soon_delay: Duration::from_secs(1),
            terminate_interval: Duration::from_secs(1),
            kill_grace: Some(Duration::from_secs(5)),
        }
    }
}

/// Configuration of the dispatcher.
#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    /// Brokers started per tube (`0` is treated as 1).
    pub per_tube: usize,
    /// Period of `list-tubes` polling when all tubes are served.
    pub discovery_interval: Duration,
    /// Maximum wait for brokers to finish their current job on shutdown.
    pub grace: Duration,
    /// Capacity of the event bus ring buffer (min 1).
    pub bus_capacity: usize,
    /// Delay policy for reconnecting a dead broker.
    pub restart: RestartBackoff,
}

impl DispatcherConfig {
    /// `per_tube`, at least 1.
    #[inline]
    pub fn per_tube_clamped(&self) -> usize {
        self.per_tube.max(1)
    }

    /// `bus_capacity`, at least 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for DispatcherConfig {
    /// - `per_tube = 1`
    /// - `discovery_interval = 10s`
    /// - `grace = 60s`
    /// - `bus_capacity = 1024`
    /// - `restart = RestartBackoff::default()` (1s doubling to 60s, equal jitter)
    fn default() -> Self {
        Self {
            per_tube: 1,
            discovery_interval: Duration::from_secs(10),
            grace: Duration::from_secs(60),
            bus_capacity: 1024,
            restart: RestartBackoff::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_budget() {
        let cfg = BrokerConfig::new("cat");
        assert_eq!(cfg.bury_policy(), BuryPolicy::default());
        assert_eq!(cfg.release_backoff.delay(2), Duration::from_secs(16));
        assert_eq!(cfg.shell_command().command(), "cat");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validation_reports_every_problem() {
        let cfg = BrokerConfig {
            shell: " ".into(),
            ..BrokerConfig::default()
        };
        let msgs = cfg.validate().unwrap_err();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0], "Command must not be empty.");
    }

    #[test]
    fn sentinels_are_clamped() {
        let d = DispatcherConfig {
            per_tube: 0,
            bus_capacity: 0,
            ..DispatcherConfig::default()
        };
        assert_eq!(d.per_tube_clamped(), 1);
        assert_eq!(d.bus_capacity_clamped(), 1);

        let b = BrokerConfig {
            terminate_interval: Duration::ZERO,
            ..BrokerConfig::default()
        };
        assert_eq!(b.terminate_interval_clamped(), MIN_TERMINATE_INTERVAL);
    }
}
