//! Retry, bury and restart policies.
//!
//! This module groups the knobs that decide **what happens after** a job or a broker
//! fails, and **how long** to wait.
//!
//! ## Contents
//! - [`ReleaseBackoff`] delay of a failed job's release, `unit × releases^exponent`
//! - [`BuryPolicy`]     retry budget; a job past it is buried without running
//! - [`RestartBackoff`] delay before a dead broker is restarted (first / factor / max + jitter)
//! - [`JitterPolicy`]   randomization of restart delays across many brokers
//!
//! ## Quick wiring
//! ```text
//! BrokerConfig { bury: BuryPolicy, release: ReleaseBackoff, .. }
//!      └─► core::broker uses:
//!           - bury.check(stats) before executing a job
//!           - release.delay(releases) when the command fails
//! DispatcherConfig { restart: RestartBackoff, .. }
//!      └─► core::actor uses restart.next(attempt) between broker restarts
//! ```
//!
//! ## Defaults
//! - `ReleaseBackoff::default()` → 0s, 1s, 16s, 81s, 256s, … (`releases^4` seconds).
//! - `BuryPolicy::default()` → bury after 1 timeout or 10 releases.
//! - `RestartBackoff::default()` → first=1s, factor=2.0, max=60s, jitter=Equal.

mod bury;
mod jitter;
mod release;
mod restart;

pub use bury::{BuryPolicy, BuryReason};
pub use jitter::JitterPolicy;
pub use release::ReleaseBackoff;
pub use restart::RestartBackoff;
