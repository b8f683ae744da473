//! Error types used by the broker runtime, the queue client and the process layer.
//!
//! This module defines four enums, ordered from the wire up:
//!
//! - [`QueueError`]: failures reported by a [`Queue`](crate::Queue) implementation.
//! - [`LaunchError`]: the worker command could not be started or fed its payload.
//! - [`BrokerError`]: conditions fatal to one broker instance (one engine).
//! - [`RuntimeError`]: conditions raised by the dispatcher itself.
//!
//! All of them provide `as_label` (a stable snake_case label for logs/metrics).

use std::time::Duration;
use thiserror::Error;

/// # Errors produced by a queue client.
///
/// `TimedOut` and `DeadlineSoon` are not failures of the connection: they are the two
/// transient answers a reserve can get, and the reservation loop absorbs them.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum QueueError {
    /// Reserve-with-timeout elapsed without a ready job.
    #[error("reserve timed out")]
    TimedOut,

    /// A job reserved earlier on this connection is about to reach its TTR.
    #[error("deadline soon")]
    DeadlineSoon,

    /// The server does not know the job, or it is not reserved by this connection.
    #[error("job {0} not found")]
    NotFound(u64),

    /// A release was answered with BURIED (server could not grow its priority queue).
    #[error("job {0} was buried instead of released")]
    Buried(u64),

    /// A stats field was missing or did not parse.
    #[error("stat {key:?} unavailable: {reason}")]
    BadStat {
        /// The stats key, e.g. `"time-left"`.
        key: &'static str,
        /// What went wrong.
        reason: String,
    },

    /// Unexpected reply from the server.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Transport failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl QueueError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use stalkvisor::QueueError;
    ///
    /// assert_eq!(QueueError::DeadlineSoon.as_label(), "queue_deadline_soon");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            QueueError::TimedOut => "queue_timed_out",
            QueueError::DeadlineSoon => "queue_deadline_soon",
            QueueError::NotFound(_) => "queue_not_found",
            QueueError::Buried(_) => "queue_buried",
            QueueError::BadStat { .. } => "queue_bad_stat",
            QueueError::Protocol(_) => "queue_protocol",
            QueueError::Io(_) => "queue_io",
        }
    }

    /// True for the reserve answers that are part of normal operation.
    pub fn is_transient(&self) -> bool {
        matches!(self, QueueError::TimedOut | QueueError::DeadlineSoon)
    }
}

/// # Errors produced while starting a worker command.
///
/// When one of these is returned no process is left running on behalf of the job.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum LaunchError {
    /// The shell interpreter could not be spawned.
    #[error("spawn {shell:?} failed: {source}")]
    Spawn {
        /// Interpreter path.
        shell: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// A handle on the spawned child (pid, stdin, stdout) was not available.
    #[error("child {0} unavailable")]
    Unavailable(&'static str),

    /// Writing the payload to the child's stdin failed.
    #[error("writing payload to stdin failed: {0}")]
    Stdin(#[source] std::io::Error),
}

impl LaunchError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            LaunchError::Spawn { .. } => "launch_spawn",
            LaunchError::Unavailable(_) => "launch_unavailable",
            LaunchError::Stdin(_) => "launch_stdin",
        }
    }
}

/// # Errors fatal to one broker instance.
///
/// The broker stops at the first one; the dispatcher restarts it on a fresh connection.
/// The job involved (if any) stays reserved and will reach its TTR on the server.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Could not open a queue connection.
    #[error("connect failed: {0}")]
    Connect(#[source] QueueError),

    /// Reserve failed with a non-transient error.
    #[error("reserve failed: {0}")]
    Reserve(#[source] QueueError),

    /// A stats query for a reserved job failed.
    #[error("stats for job {job} failed: {source}")]
    Stats {
        /// Job id.
        job: u64,
        /// Underlying queue error.
        #[source]
        source: QueueError,
    },

    /// The worker command could not be launched.
    #[error("launch for job {job} failed: {source}")]
    Launch {
        /// Job id.
        job: u64,
        /// Underlying launch error.
        #[source]
        source: LaunchError,
    },

    /// A delete/release/bury call failed.
    #[error("{action} of job {job} failed: {source}")]
    Disposition {
        /// Job id.
        job: u64,
        /// `"delete"`, `"release"` or `"bury"`.
        action: &'static str,
        /// Underlying queue error.
        #[source]
        source: QueueError,
    },
}

impl BrokerError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use stalkvisor::{BrokerError, QueueError};
    ///
    /// let err = BrokerError::Disposition { job: 7, action: "delete", source: QueueError::NotFound(7) };
    /// assert_eq!(err.as_label(), "broker_disposition");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            BrokerError::Connect(_) => "broker_connect",
            BrokerError::Reserve(_) => "broker_reserve",
            BrokerError::Stats { .. } => "broker_stats",
            BrokerError::Launch { .. } => "broker_launch",
            BrokerError::Disposition { .. } => "broker_disposition",
        }
    }

    /// Job the error relates to, if one was reserved.
    pub fn job(&self) -> Option<u64> {
        match self {
            BrokerError::Connect(_) | BrokerError::Reserve(_) => None,
            BrokerError::Stats { job, .. }
            | BrokerError::Launch { job, .. }
            | BrokerError::Disposition { job, .. } => Some(*job),
        }
    }
}

/// # Errors produced by the dispatcher.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Shutdown grace period was exceeded; some brokers were still busy with a job.
    #[error("shutdown timeout {grace:?} exceeded; busy: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Brokers (`tube#slot`) that were mid-job.
        stuck: Vec<String>,
    },

    /// OS signal handlers could not be installed.
    #[error("signal handler: {0}")]
    Signal(#[source] std::io::Error),

    /// Tube discovery could not open its connection.
    #[error("tube discovery failed: {0}")]
    Discovery(#[source] QueueError),
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
            RuntimeError::Signal(_) => "runtime_signal",
            RuntimeError::Discovery(_) => "runtime_discovery",
        }
    }
}
