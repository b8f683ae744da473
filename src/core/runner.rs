//! # JobRunner: one reservation, from retry check to disposition.
//!
//! Runs the execution engine for a single reserved job and publishes its lifecycle to
//! the [`Bus`].
//!
//! ## Cycle
//! ```text
//! stats() ──► retry budget spent? ──yes──► bury ──► JobBuriedUnexecuted
//!                  │ no
//!                  ▼
//!        deadline = time-left + ttr_margin   (timer armed)
//!                  ▼
//!        start command ─► STREAMING ──EOF──► AWAITING_EXIT ──exit──► EXITED
//!                          ▲   │                 ▲    │
//!                          └───┴── deadline ─────┴────┘  SIGTERM (repeated),
//!                                                         SIGKILL after kill_grace
//!                  ▼
//!        timed out      → no disposition (left to the server's TTR)
//!        exit 0         → delete
//!        bury_exit_code → bury
//!        otherwise      → release(delay = backoff(releases))
//!                  ▼
//!        JobCompleted { JobResult }
//! ```
//!
//! ## Rules
//! - Exactly one disposition per reservation, or none when the command timed out.
//!   [`JobHandle`] is consumed by its disposition, so a second one cannot be written.
//! - Stats are re-read at every decision point and never cached between them.
//! - All result mutation happens here; the stdin writer, the stdout reader and the exit
//!   waiter only hand data over through channels.
//! - The deadline runs while the payload is still being written: a command that never
//!   reads its stdin is terminated like any other.
//! - A launch or disposition failure is returned as [`BrokerError`] and ends the broker.

use std::{io, os::unix::process::ExitStatusExt, process::ExitStatus, sync::Arc, time::Duration};

use tokio::time::{self, Instant};

use crate::{
    core::config::BrokerConfig,
    error::{BrokerError, LaunchError},
    events::{Bus, Event, EventKind},
    job::{Disposition, JobHandle, JobResult},
    policies::BuryReason,
    process::{Launched, ProcessControl, ShellCommand},
};

/// Outcome of running the command for one job.
#[derive(Debug)]
pub struct ExecutionResult {
    /// Exit code; `None` when killed by a signal or when waiting failed.
    pub exit_status: Option<i32>,
    /// Standard output in arrival order.
    pub stdout: Vec<u8>,
    /// The deadline fired before the command exited.
    pub timed_out: bool,
    /// Waiting for the process failed.
    pub wait_error: Option<io::Error>,
}

/// How a cycle ended.
#[derive(Debug)]
pub enum Cycle {
    /// Retry budget spent; the command did not run.
    BuriedUnexecuted(BuryReason),
    /// The command ran.
    Executed(JobResult),
}

/// Deadline escalation state.
#[derive(Default)]
struct Escalation {
    first_term: Option<Instant>,
    killed: bool,
}

/// Executes reserved jobs for one broker.
pub struct JobRunner {
    cfg: Arc<BrokerConfig>,
    command: ShellCommand,
    bus: Bus,
    tube: Arc<str>,
    broker: Arc<str>,
}

impl JobRunner {
    /// Creates a runner publishing as `broker` on `tube`.
    pub fn new(
        cfg: Arc<BrokerConfig>,
        bus: Bus,
        tube: impl Into<Arc<str>>,
        broker: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            command: cfg.shell_command(),
            cfg,
            bus,
            tube: tube.into(),
            broker: broker.into(),
        }
    }

    /// Runs one cycle for `job`.
    pub async fn run(&self, job: JobHandle) -> Result<Cycle, BrokerError> {
        let id = job.id();
        let stats = job
            .stats()
            .await
            .map_err(|source| BrokerError::Stats { job: id, source })?;

        if let Some(reason) = self.cfg.bury_policy().check(&stats) {
            job.bury().await.map_err(|source| BrokerError::Disposition {
                job: id,
                action: "bury",
                source,
            })?;
            self.publish(
                self.event(EventKind::JobBuriedUnexecuted, id)
                    .with_reason(reason.to_string()),
            );
            return Ok(Cycle::BuriedUnexecuted(reason));
        }

        let deadline = stats.time_left + self.cfg.ttr_margin;
        let exec = self
            .execute(id, job.body(), deadline)
            .await
            .map_err(|source| BrokerError::Launch { job: id, source })?;

        let disposition = self.decide(&job, &exec).await?;
        match disposition {
            Some(d) => {
                job.dispose(d).await.map_err(|source| BrokerError::Disposition {
                    job: id,
                    action: d.as_label(),
                    source,
                })?;
                self.publish_disposition(id, d, exec.exit_status);
            }
            None => {
                drop(job);
                self.publish(self.event(EventKind::JobLeftToTimeout, id));
            }
        }

        let result = JobResult {
            job_id: id,
            tube: self.tube.to_string(),
            exit_status: exec.exit_status,
            timed_out: exec.timed_out,
            stdout: exec.stdout,
            disposition,
        };
        self.publish(self.event(EventKind::JobCompleted, id).with_result(result.clone()));
        Ok(Cycle::Executed(result))
    }

    /// Maps an execution result to the disposition to apply.
    async fn decide(
        &self,
        job: &JobHandle,
        exec: &ExecutionResult,
    ) -> Result<Option<Disposition>, BrokerError> {
        if exec.timed_out {
            return Ok(None);
        }
        match exec.exit_status {
            Some(0) => Ok(Some(Disposition::Delete)),
            Some(code) if self.cfg.bury_exit_code == Some(code) => Ok(Some(Disposition::Bury)),
            _ => {
                let releases = job.releases().await.map_err(|source| BrokerError::Stats {
                    job: job.id(),
                    source,
                })?;
                Ok(Some(Disposition::Release {
                    delay: self.cfg.release_backoff.delay(releases),
                }))
            }
        }
    }

    /// Runs the command, racing the stdin write, stdout, process exit and the deadline.
    async fn execute(
        &self,
        id: u64,
        payload: &[u8],
        deadline: Duration,
    ) -> Result<ExecutionResult, LaunchError> {
        let timer = time::sleep(deadline);
        tokio::pin!(timer);

        let Launched {
            control,
            mut stdin,
            mut stdout,
            mut exit,
        } = self.command.start(payload).await?;
        self.publish(
            self.event(EventKind::CommandStarted, id)
                .with_reason(format!("pid={}", control.pid()))
                .with_delay(deadline),
        );

        let mut out = Vec::new();
        let mut feeding = true;
        let mut streaming = true;
        let mut exited: Option<io::Result<ExitStatus>> = None;
        let mut escalation = Escalation::default();

        let status = loop {
            if !streaming {
                if let Some(status) = exited.take() {
                    break status;
                }
            }
            tokio::select! {
                fed = &mut stdin, if feeding => {
                    feeding = false;
                    if let Err(e) = fed {
                        let _ = control.kill();
                        return Err(e);
                    }
                }
                chunk = stdout.next_chunk(), if streaming => match chunk {
                    Some(bytes) => out.extend_from_slice(&bytes),
                    None => streaming = false,
                },
                status = &mut exit, if exited.is_none() => exited = Some(status),
                () = &mut timer => {
                    let now = Instant::now();
                    if escalation.first_term.is_none() {
                        self.publish(self.event(EventKind::DeadlineHit, id).with_delay(deadline));
                    }
                    let next = self.escalate(id, &control, &mut escalation, now);
                    timer.as_mut().reset(next);
                }
            }
        };

        let timed_out = escalation.first_term.is_some();
        let (exit_status, wait_error) = match status {
            Ok(status) => {
                let mut ev = self
                    .event(EventKind::CommandExited, id)
                    .with_exit_status(status.code());
                if let Some(sig) = status.signal() {
                    ev = ev.with_reason(format!("signal {sig}"));
                }
                self.publish(ev);
                (status.code(), None)
            }
            Err(e) => {
                self.publish(
                    self.event(EventKind::CommandExited, id)
                        .with_reason(format!("wait failed: {e}")),
                );
                (None, Some(e))
            }
        };

        Ok(ExecutionResult {
            exit_status,
            stdout: out,
            timed_out,
            wait_error,
        })
    }

    /// Sends SIGTERM (and SIGKILL once the grace is spent); returns the next wake-up.
    fn escalate(
        &self,
        id: u64,
        control: &ProcessControl,
        esc: &mut Escalation,
        now: Instant,
    ) -> Instant {
        let first = *esc.first_term.get_or_insert(now);

        if !esc.killed {
            match control.terminate() {
                Ok(()) => self.publish(self.event(EventKind::TerminateSent, id)),
                Err(e) => tracing::warn!(job = id, error = %e, "SIGTERM failed"),
            }
        }
        if let Some(grace) = self.cfg.kill_grace {
            if !esc.killed && now.duration_since(first) >= grace {
                esc.killed = true;
                match control.kill() {
                    Ok(()) => self.publish(self.event(EventKind::KillSent, id)),
                    Err(e) => tracing::warn!(job = id, error = %e, "SIGKILL failed"),
                }
            }
        }

        let mut next = now + self.cfg.terminate_interval_clamped();
        if let (Some(grace), false) = (self.cfg.kill_grace, esc.killed) {
            next = next.min(first + grace);
        }
        next
    }

    fn publish_disposition(&self, id: u64, d: Disposition, exit_status: Option<i32>) {
        let ev = match d {
            Disposition::Delete => self.event(EventKind::JobDeleted, id),
            Disposition::Release { delay } => {
                self.event(EventKind::JobReleased, id).with_delay(delay)
            }
            Disposition::Bury => self
                .event(EventKind::JobBuried, id)
                .with_exit_status(exit_status),
        };
        self.publish(ev);
    }

    fn event(&self, kind: EventKind, id: u64) -> Event {
        Event::new(kind)
            .with_tube(Arc::clone(&self.tube))
            .with_broker(Arc::clone(&self.broker))
            .with_job(id)
    }

    fn publish(&self, ev: Event) {
        self.bus.publish(ev);
    }
}
