//! # LogWriter: events as `tracing` records.
//!
//! Normal lifecycle goes to `info`, per-job chatter to `debug`, timeouts, buries and
//! restarts to `warn`, broker death to `error`.
//!
//! ## Example output (fmt subscriber)
//! ```text
//! INFO  broker started broker="emails#0" tube="emails" attempt=0
//! DEBUG job reserved broker="emails#0" job=17
//! INFO  job deleted broker="emails#0" job=17
//! WARN  deadline hit, terminating broker="emails#0" job=18 deadline=61s
//! WARN  job left to time out broker="emails#0" job=18
//! ERROR broker died broker="emails#0" job=19 error="release of job 19 failed: ..."
//! ```

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Subscriber that renders events through `tracing`.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Constructs a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let broker = e.broker.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("");
        match e.kind {
            EventKind::BrokerStarted => {
                info!(broker, tube = e.tube.as_deref(), attempt = e.attempt, "broker started");
            }
            EventKind::BrokerDead => {
                error!(broker, job = e.job, error = reason, "broker died");
            }
            EventKind::RestartScheduled => {
                warn!(broker, delay = ?e.delay, attempt = e.attempt, "broker restart scheduled");
            }
            EventKind::JobReserved => {
                debug!(broker, job = e.job, "job reserved");
            }
            EventKind::JobBuriedUnexecuted => {
                warn!(broker, job = e.job, reason, "job buried without running");
            }
            EventKind::CommandStarted => {
                debug!(broker, job = e.job, deadline = ?e.delay, reason, "command started");
            }
            EventKind::DeadlineHit => {
                warn!(broker, job = e.job, deadline = ?e.delay, "deadline hit, terminating");
            }
            EventKind::TerminateSent => {
                debug!(broker, job = e.job, "SIGTERM sent");
            }
            EventKind::KillSent => {
                warn!(broker, job = e.job, "SIGKILL sent");
            }
            EventKind::CommandExited => {
                debug!(broker, job = e.job, exit_status = e.exit_status, reason, "command exited");
            }
            EventKind::JobDeleted => {
                info!(broker, job = e.job, "job deleted");
            }
            EventKind::JobReleased => {
                info!(broker, job = e.job, delay = ?e.delay, "job released");
            }
            EventKind::JobBuried => {
                warn!(broker, job = e.job, exit_status = e.exit_status, "job buried");
            }
            EventKind::JobLeftToTimeout => {
                warn!(broker, job = e.job, "job left to time out");
            }
            EventKind::JobCompleted => {
                let stdout_len = e.result.as_ref().map(|r| r.stdout.len());
                debug!(broker, job = e.job, exit_status = e.exit_status, stdout_len, "job cycle completed");
            }
            EventKind::TubeDiscovered => {
                info!(tube = e.tube.as_deref(), "tube discovered");
            }
            EventKind::DiscoveryFailed => {
                warn!(error = reason, "tube discovery failed");
            }
            EventKind::ShutdownRequested => {
                info!("shutdown requested");
            }
            EventKind::AllStoppedWithin => {
                info!("all brokers stopped within grace");
            }
            EventKind::GraceExceeded => {
                error!(busy = reason, "shutdown grace exceeded");
            }
            EventKind::SubscriberOverflow => {
                warn!(reason, "subscriber dropped an event");
            }
            EventKind::SubscriberPanicked => {
                error!(reason, "subscriber panicked");
            }
        }
    }

    fn name(&self) -> &'static str {
        "log_writer"
    }
}
