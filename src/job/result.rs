//! # Per-cycle result record.

use super::Disposition;

/// What happened to one executed job.
///
/// Emitted once per cycle that ran the command; jobs buried before execution produce
/// no result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobResult {
    /// Server-assigned job id.
    pub job_id: u64,
    /// Tube the job was reserved from.
    pub tube: String,
    /// Exit code, `None` if the command was killed by a signal or could not be waited on.
    pub exit_status: Option<i32>,
    /// The deadline fired before the command exited.
    pub timed_out: bool,
    /// Everything the command wrote to stdout, in arrival order.
    pub stdout: Vec<u8>,
    /// Action taken on the job; `None` when it was left to its TTR.
    pub disposition: Option<Disposition>,
}

impl JobResult {
    /// True when the command exited with status 0 within its deadline.
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_status == Some(0)
    }
}
