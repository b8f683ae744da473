//! # stalkvisor
//!
//! **Stalkvisor** turns a shell command into a beanstalkd worker.
//!
//! Brokers reserve jobs from their tube, pipe the job body into the command, enforce the
//! job's time-to-run as a deadline, and let the outcome decide the job's fate: delete on
//! success, release with a growing delay on failure, bury on a configured exit code or
//! once a job has timed out or been released too often.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!                ┌───────────────────────────────────────────────┐
//!                │ Dispatcher                                    │
//!                │  - Bus (broadcast events)                     │
//!                │  - AliveTracker (busy brokers, by seq)        │
//!                │  - SubscriberSet (per-subscriber queues)      │
//!                │  - SlotRegistry (per_tube slots per tube)     │
//!                │  - discovery (TubeSelection::All)             │
//!                └──────┬──────────────────┬─────────────────────┘
//!                       ▼                  ▼
//!              ┌────────────────┐  ┌────────────────┐
//!              │ BrokerActor    │  │ BrokerActor    │   one connection each,
//!              │ "emails#0"     │  │ "emails#1"     │   restart with backoff
//!              └──────┬─────────┘  └──────┬─────────┘
//!                     ▼                   ▼
//!              Broker: ReservationLoop ─► JobRunner ─► delete | release | bury
//!                                            │
//!                                            └─► ShellCommand (sh -c <cmd>, body on stdin)
//!
//!   every stage ── publish ──► Bus ──► listener ──► LogWriter, AliveTracker,
//!                                                   ResultForwarder, custom subscribers
//! ```
//!
//! ### One cycle
//! ```text
//! reserve ─► JobReserved
//!   ├─ stats: timeouts ≥ threshold or releases ≥ threshold ─► bury ─► JobBuriedUnexecuted
//!   └─ run command, deadline = time-left + ttr_margin
//!        ├─ CommandStarted
//!        ├─ deadline hit ─► DeadlineHit, SIGTERM (repeated), SIGKILL after kill_grace
//!        ├─ CommandExited
//!        ├─ timed out      ─► JobLeftToTimeout (server re-queues after TTR)
//!        ├─ exit 0         ─► delete  ─► JobDeleted
//!        ├─ bury_exit_code ─► bury    ─► JobBuried
//!        └─ otherwise      ─► release(delay = backoff(releases)) ─► JobReleased
//!      ─► JobCompleted { JobResult }
//! ```
//!
//! ## Features
//! | Area              | Description                                                   | Key types / traits                                   |
//! |-------------------|---------------------------------------------------------------|------------------------------------------------------|
//! | **Dispatching**   | Serve named tubes or all of them, shut down gracefully.       | [`Dispatcher`], [`TubeSelection`]                    |
//! | **Brokers**       | Reserve, execute and dispose, one job at a time.              | [`Broker`], [`JobRunner`], [`ReservationLoop`]       |
//! | **Queue seam**    | beanstalkd over TCP, or an in-process queue.                  | [`Queue`], [`Connect`], [`MemoryQueue`]              |
//! | **Policies**      | Bury thresholds, release delays, restart backoff.             | [`BuryPolicy`], [`ReleaseBackoff`], [`RestartBackoff`] |
//! | **Subscriber API**| Hook into broker events (logging, results, metrics).          | [`Subscribe`], [`ResultForwarder`]                   |
//! | **Errors**        | Typed errors for the queue, launches, brokers and runtime.    | [`QueueError`], [`BrokerError`], [`RuntimeError`]    |
//! | **Configuration** | Broker and dispatcher settings.                               | [`BrokerConfig`], [`DispatcherConfig`]               |
//!
//! ## Optional features
//! - `logging`: exports the built-in [`LogWriter`] subscriber, rendering events with `tracing`.
//!
//! ## Example
//! ```rust
//! use std::{sync::Arc, time::Duration};
//! use stalkvisor::{
//!     BrokerConfig, Dispatcher, DispatcherConfig, MemoryQueue, ResultForwarder, TubeSelection,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let queue = MemoryQueue::new();
//!     queue.put("greetings", 0, Duration::from_secs(60), "hello");
//!
//!     let (forwarder, mut results) = ResultForwarder::channel(16);
//!     let dispatcher = Dispatcher::builder(
//!         DispatcherConfig::default(),
//!         BrokerConfig::new("tr a-z A-Z"),
//!         Arc::new(queue),
//!     )
//!     .with_subscriber(Arc::new(forwarder))
//!     .build();
//!
//!     // Stop once the first result arrives.
//!     let mut first = None;
//!     let tubes = TubeSelection::Named(vec!["greetings".into()]);
//!     dispatcher
//!         .run_until(tubes, async { first = results.recv().await })
//!         .await?;
//!     dispatcher.close().await;
//!
//!     let result = first.ok_or("no result")?;
//!     assert_eq!(result.stdout, b"HELLO");
//!     assert!(result.succeeded());
//!     Ok(())
//! }
//! ```

mod core;
mod error;
mod events;
mod job;
mod policies;
mod process;
mod queue;
mod subscribers;

// ---- Public re-exports ----

pub use self::core::{
    Broker, BrokerActor, BrokerConfig, Cycle, Dispatcher, DispatcherBuilder, DispatcherConfig,
    ExecutionResult, JobRunner, ReservationLoop, TubeSelection, slot_name,
};
pub use error::{BrokerError, LaunchError, QueueError, RuntimeError};
pub use events::{Bus, Event, EventKind};
pub use job::{Disposition, JobHandle, JobResult, JobStats};
pub use policies::{BuryPolicy, BuryReason, JitterPolicy, ReleaseBackoff, RestartBackoff};
pub use process::{
    ExitSignal, Launched, ProcessControl, ShellCommand, StdinFeed, StdoutStream,
};
pub use queue::{
    BeanstalkClient, BeanstalkConnector, Connect, JobState, MemoryQueue, Queue, QueueRef,
};
pub use subscribers::{AliveTracker, ResultForwarder, Subscribe, SubscriberSet};

// Optional: expose a simple built-in logger subscriber.
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
