//! # Queue protocol seam.
//!
//! The broker never speaks a wire protocol directly: it talks to a [`Queue`], and the
//! dispatcher obtains one queue connection per broker slot through a [`Connect`].
//!
//! ## Contents
//! - [`Queue`] reserve / delete / release / bury / stats-job / list-tubes
//! - [`Connect`] factory producing a fresh connection per broker instance
//! - [`BeanstalkClient`], [`BeanstalkConnector`] beanstalkd text protocol over TCP
//! - [`MemoryQueue`] in-process queue with beanstalkd semantics (embedding, tests)
//!
//! ## Connection policy
//! ```text
//! Dispatcher ──► Connect::connect() ──► QueueRef  (one per broker slot)
//!                                          │
//!                 reserve ─► stats ─► delete|release|bury   (strictly sequential)
//! ```
//! Implementations must tolerate concurrent callers, but a broker only ever has one
//! command in flight.

mod beanstalk;
mod memory;

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;

use crate::error::QueueError;

pub use beanstalk::{BeanstalkClient, BeanstalkConnector};
pub use memory::{JobState, MemoryQueue};

/// Shared handle to a queue connection.
pub type QueueRef = Arc<dyn Queue>;

/// Minimal work-queue protocol used by the broker.
///
/// Job ids are server-assigned and unique while any disposition is outstanding.
#[async_trait]
pub trait Queue: Send + Sync + 'static {
    /// Reserves the next ready job from any of `tubes`, waiting at most `timeout`.
    ///
    /// Returns [`QueueError::TimedOut`] when nothing became ready, and
    /// [`QueueError::DeadlineSoon`] when another reservation held by this connection is
    /// about to expire.
    async fn reserve(&self, tubes: &[String], timeout: Duration)
    -> Result<(u64, Vec<u8>), QueueError>;

    /// Deletes a reserved job.
    async fn delete(&self, id: u64) -> Result<(), QueueError>;

    /// Puts a reserved job back into the ready queue (delayed by `delay`).
    async fn release(&self, id: u64, priority: u32, delay: Duration) -> Result<(), QueueError>;

    /// Moves a reserved job to the buried list.
    async fn bury(&self, id: u64, priority: u32) -> Result<(), QueueError>;

    /// Raw per-job statistics; contains at least `pri`, `time-left`, `timeouts`, `releases`.
    async fn stats_job(&self, id: u64) -> Result<HashMap<String, String>, QueueError>;

    /// Names of all existing tubes.
    async fn list_tubes(&self) -> Result<Vec<String>, QueueError>;
}

/// Opens queue connections.
///
/// Each broker slot calls [`Connect::connect`] when it starts and again after every
/// restart, so a broken connection never outlives the broker that observed the failure.
#[async_trait]
pub trait Connect: Send + Sync + 'static {
    /// Opens a new connection.
    async fn connect(&self) -> Result<QueueRef, QueueError>;

    /// Human-readable target, used in events.
    fn target(&self) -> String;
}
