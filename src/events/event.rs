//! # Runtime events emitted by the dispatcher, broker actors and the job runner.
//!
//! The [`EventKind`] enum classifies events in four groups:
//! - **Broker events**: a broker slot started, died, or scheduled its restart
//! - **Job events**: one reservation from reserve to its disposition
//! - **Dispatcher events**: tube discovery and shutdown
//! - **Subscriber events**: delivery problems of the subscriber workers
//!
//! The [`Event`] struct carries the optional metadata (tube, broker, job id, delay,
//! exit status, reason, result).
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use stalkvisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::JobReleased)
//!     .with_broker("emails#0")
//!     .with_job(42)
//!     .with_delay(Duration::from_secs(16));
//!
//! assert_eq!(ev.kind, EventKind::JobReleased);
//! assert_eq!(ev.broker.as_deref(), Some("emails#0"));
//! assert_eq!(ev.job, Some(42));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use crate::job::JobResult;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // === Broker events ===
    /// A broker connected and is about to reserve.
    ///
    /// Sets: `tube`, `broker`, `attempt` (restart number, 0 for the first start).
    BrokerStarted,

    /// A broker stopped on a fatal error.
    ///
    /// Sets: `tube`, `broker`, `reason` (error), `job` (if one was reserved).
    BrokerDead,

    /// A dead broker will reconnect after `delay`.
    ///
    /// Sets: `tube`, `broker`, `delay`, `attempt`.
    RestartScheduled,

    // === Job events ===
    /// A job was reserved.
    ///
    /// Sets: `tube`, `broker`, `job`.
    JobReserved,

    /// The job's retry budget was already spent; it was buried without running.
    ///
    /// Sets: `tube`, `broker`, `job`, `reason` (which threshold).
    JobBuriedUnexecuted,

    /// The command was spawned and fed its payload.
    ///
    /// Sets: `tube`, `broker`, `job`, `reason` (`pid=<n>`), `delay` (deadline).
    CommandStarted,

    /// The deadline fired before the command exited.
    ///
    /// Sets: `tube`, `broker`, `job`, `delay` (deadline).
    DeadlineHit,

    /// SIGTERM sent to the command's process group.
    ///
    /// Sets: `tube`, `broker`, `job`.
    TerminateSent,

    /// SIGKILL sent after the kill grace elapsed.
    ///
    /// Sets: `tube`, `broker`, `job`.
    KillSent,

    /// The command exited.
    ///
    /// Sets: `tube`, `broker`, `job`, `exit_status` (absent when killed by a signal),
    /// `reason` (signal or wait error, if any).
    CommandExited,

    /// Sets: `tube`, `broker`, `job`.
    JobDeleted,

    /// Sets: `tube`, `broker`, `job`, `delay`.
    JobReleased,

    /// Sets: `tube`, `broker`, `job`, `exit_status`.
    JobBuried,

    /// The command timed out; the job gets no disposition and will reach its TTR.
    ///
    /// Sets: `tube`, `broker`, `job`.
    JobLeftToTimeout,

    /// An executed cycle finished. Always the last event of a cycle that ran the command.
    ///
    /// Sets: `tube`, `broker`, `job`, `exit_status`, `result`.
    JobCompleted,

    // === Dispatcher events ===
    /// Discovery found a tube without brokers and started them.
    ///
    /// Sets: `tube`.
    TubeDiscovered,

    /// Listing tubes failed; discovery retries on its next tick.
    ///
    /// Sets: `reason`.
    DiscoveryFailed,

    /// Shutdown requested (OS signal observed).
    ShutdownRequested,

    /// All brokers stopped within the grace period.
    AllStoppedWithin,

    /// Grace period exceeded; some brokers were still busy with a job.
    GraceExceeded,

    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets: `reason` (`subscriber=<name> panic=<message>`).
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets: `reason` (`subscriber=<name> reason=<full|closed>`).
    SubscriberOverflow,
}

impl EventKind {
    /// True for the events that end a broker's work on a reservation.
    pub fn ends_cycle(&self) -> bool {
        matches!(
            self,
            EventKind::JobBuriedUnexecuted | EventKind::JobCompleted | EventKind::BrokerDead
        )
    }
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Tube the event relates to.
    pub tube: Option<Arc<str>>,
    /// Broker slot name (`tube#n`).
    pub broker: Option<Arc<str>>,
    /// Job id.
    pub job: Option<u64>,
    /// Release delay, restart delay or deadline, depending on the kind.
    pub delay: Option<Duration>,
    /// Exit code of the command.
    pub exit_status: Option<i32>,
    /// Restart attempt.
    pub attempt: Option<u32>,
    /// Human-readable reason (errors, overflow details, etc.).
    pub reason: Option<Arc<str>>,
    /// Result of an executed cycle (only for `JobCompleted`).
    pub result: Option<Arc<JobResult>>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            tube: None,
            broker: None,
            job: None,
            delay: None,
            exit_status: None,
            attempt: None,
            reason: None,
            result: None,
        }
    }

    /// Attaches a tube name.
    #[inline]
    pub fn with_tube(mut self, tube: impl Into<Arc<str>>) -> Self {
        self.tube = Some(tube.into());
        self
    }

    /// Attaches a broker slot name.
    #[inline]
    pub fn with_broker(mut self, broker: impl Into<Arc<str>>) -> Self {
        self.broker = Some(broker.into());
        self
    }

    /// Attaches a job id.
    #[inline]
    pub fn with_job(mut self, id: u64) -> Self {
        self.job = Some(id);
        self
    }

    /// Attaches a delay.
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay = Some(d);
        self
    }

    /// Attaches an exit status (no-op for `None`).
    #[inline]
    pub fn with_exit_status(mut self, code: Option<i32>) -> Self {
        self.exit_status = code;
        self
    }

    /// Attaches a restart attempt.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches the result of an executed cycle.
    #[inline]
    pub fn with_result(mut self, result: JobResult) -> Self {
        self.exit_status = result.exit_status;
        self.job = Some(result.job_id);
        self.result = Some(Arc::new(result));
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_reason(format!("subscriber={subscriber} panic={info}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_is_monotonic() {
        let a = Event::new(EventKind::JobReserved);
        let b = Event::new(EventKind::JobDeleted);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn result_sets_job_and_exit_status() {
        let ev = Event::new(EventKind::JobCompleted).with_result(JobResult {
            job_id: 9,
            tube: "t".into(),
            exit_status: Some(3),
            timed_out: false,
            stdout: b"out".to_vec(),
            disposition: None,
        });
        assert_eq!(ev.job, Some(9));
        assert_eq!(ev.exit_status, Some(3));
        assert_eq!(ev.result.as_ref().map(|r| r.stdout.as_slice()), Some(&b"out"[..]));
    }

    #[test]
    fn cycle_terminal_kinds() {
        assert!(EventKind::JobCompleted.ends_cycle());
        assert!(EventKind::BrokerDead.ends_cycle());
        assert!(!EventKind::JobDeleted.ends_cycle());
    }
}
